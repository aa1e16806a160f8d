//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use revisit::crawler::{FetchRequest, FetchResponse, Fetcher};
use revisit::models::Link;
use revisit::parser::HtmlMetadataExtractor;
use revisit::scheduler::{CyclePolicy, EngineSettings, ProxyPool, Scheduler};
use revisit::storage::MemoryLinkStore;
use revisit::utils::error::FetchError;

pub const PAGE_URL: &str = "https://files.example.com/d/abc";
pub const DOWNLOAD_URL: &str = "https://files.example.com/d/abc/download";

/// Link page with a heading, a details list and a download button
pub fn link_page(filename: &str, details: &str, href: &str) -> String {
    format!(
        r#"<html><body>
             <div class="file">
               <span class="text-2xl">{filename}</span>
               <ul><li>Uploaded today</li><li>12 views</li><li>{details}</li></ul>
             </div>
             <a class="link-button gay-button" hx-get="{href}">Download</a>
           </body></html>"#
    )
}

/// Link page that lost its download button
pub fn page_without_button() -> String {
    r#"<html><body><span class="text-2xl">orphan.bin</span></body></html>"#.to_string()
}

/// Link page with a working button but no file name heading
pub fn page_without_filename() -> String {
    r#"<html><body>
         <a class="link-button gay-button" hx-get="/d/abc/download">Download</a>
       </body></html>"#
        .to_string()
}

/// Canned answer for one URL
#[derive(Debug, Clone)]
pub enum Scripted {
    Answer { status: u16, body: String },
    Timeout,
}

/// Fetcher that answers from a script and remembers every request
#[derive(Default)]
pub struct FakeFetcher {
    routes: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A healthy link page whose button leads to a 200 download
    pub fn healthy() -> Self {
        let fetcher = Self::new();
        fetcher.answer(PAGE_URL, 200, &link_page("report.pdf", "2.1 MB", "/d/abc/download"));
        fetcher.answer(DOWNLOAD_URL, 200, "");
        fetcher
    }

    pub fn answer(&self, url: &str, status: u16, body: &str) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Scripted::Answer {
                status,
                body: body.to_string(),
            },
        );
    }

    pub fn time_out(&self, url: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Scripted::Timeout);
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<FetchRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url == url)
            .collect()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        let scripted = self.routes.lock().unwrap().get(&url).cloned();
        match scripted {
            Some(Scripted::Answer { status, body }) => Ok(FetchResponse {
                status,
                body,
                final_url: url,
            }),
            Some(Scripted::Timeout) => Err(FetchError::Timeout),
            None => Ok(FetchResponse {
                status: 404,
                body: String::new(),
                final_url: url,
            }),
        }
    }
}

/// Settings with no human delays so tests run instantly
pub fn fast_settings(quota: u32) -> EngineSettings {
    EngineSettings {
        policy: CyclePolicy::new(quota, Duration::days(45), Duration::days(45)).unwrap(),
        tick_interval: std::time::Duration::from_millis(50),
        pre_visit_delay_ms: 0..=0,
        pre_download_delay_ms: 0..=0,
        max_concurrent_visits: 4,
        shutdown_grace: std::time::Duration::from_secs(1),
        ..EngineSettings::default()
    }
}

/// Link whose cycle started `age` ago and lasts `length`
pub fn link_started(id: i64, url: &str, age: Duration, length: Duration) -> Link {
    Link::new(id, url, Utc::now() - age, length)
}

/// Link at slot zero of a cycle that starts now
pub fn due_link(id: i64) -> Link {
    link_started(id, PAGE_URL, Duration::seconds(1), Duration::days(45))
}

pub struct Harness {
    pub store: Arc<MemoryLinkStore>,
    pub fetcher: Arc<FakeFetcher>,
    pub scheduler: Scheduler,
}

/// Scheduler over an in-memory store and a scripted fetcher
pub fn harness(settings: EngineSettings, pool: ProxyPool, fetcher: FakeFetcher, seed: u64) -> Harness {
    let store = Arc::new(MemoryLinkStore::new());
    let fetcher = Arc::new(fetcher);
    let scheduler = Scheduler::builder(
        settings,
        store.clone(),
        fetcher.clone(),
        Arc::new(HtmlMetadataExtractor::new()),
    )
    .proxy_pool(pool)
    .seed(seed)
    .build()
    .unwrap();

    Harness {
        store,
        fetcher,
        scheduler,
    }
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}
