//! Outbound HTTP for link visits
//!
//! The scheduler issues requests through the [`Fetcher`] trait so tests can
//! swap the network for a scripted fake. [`HttpFetcher`] is the reqwest-based
//! implementation used in production.

pub mod fetcher;
pub mod headers;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::time::Duration;

use crate::utils::error::FetchError;

pub use fetcher::HttpFetcher;

/// One GET request, optionally routed through a proxy
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub proxy: Option<String>,
    pub headers: HeaderMap,
    pub timeout: Duration,

    /// When false only the status line and headers are awaited
    pub read_body: bool,
}

impl FetchRequest {
    /// Direct GET with no extra headers
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            proxy: None,
            headers: HeaderMap::new(),
            timeout,
            read_body: true,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Skip downloading the response body
    pub fn without_body(mut self) -> Self {
        self.read_body = false;
        self
    }
}

/// What came back from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,

    /// URL after redirects
    pub final_url: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx answer into [`FetchError::Status`]
    pub fn error_for_status(self) -> Result<Self, FetchError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchError::Status(self.status))
        }
    }
}

/// Issues HTTP requests on behalf of the scheduler
///
/// Any answer from the server, whatever its status, is `Ok`; errors are
/// reserved for requests that never produced a response.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}
