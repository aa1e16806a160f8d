pub mod links;
pub mod run;

// Re-export command functions for convenience
pub use links::{add, list, logs, print_metrics, remove, schedule, set_active, visit};
pub use run::run;

use anyhow::{Context, Result};
use std::sync::Arc;

use revisit::config::Config;
use revisit::crawler::HttpFetcher;
use revisit::parser::HtmlMetadataExtractor;
use revisit::scheduler::{EngineSettings, ProxyPool, Scheduler};
use revisit::storage::SharedLinkStore;

/// Wire the production collaborators into a scheduler
pub(crate) fn build_scheduler(config: &Config, store: SharedLinkStore) -> Result<Scheduler> {
    let settings = EngineSettings::from_config(config).context("Invalid engine settings")?;
    let fetcher = HttpFetcher::new(&config.http).context("Failed to create HTTP fetcher")?;

    let scheduler = Scheduler::builder(
        settings,
        store,
        Arc::new(fetcher),
        Arc::new(HtmlMetadataExtractor::new()),
    )
    .proxy_pool(ProxyPool::from_config(&config.proxies))
    .build()?;

    Ok(scheduler)
}
