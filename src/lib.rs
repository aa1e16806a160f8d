//! revisit - Scheduled link visitor with proxy rotation
//!
//! Keeps a set of file-host links alive by visiting each one a fixed number
//! of times per cycle, front-loading the visits and rotating the outbound
//! proxy so the same address does not hit the same link twice in a day.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`crawler`] - HTTP fetching with per-proxy clients and rate limiting
//! - [`parser`] - HTML parsing and metadata extraction
//! - [`models`] - Core data structures and types
//! - [`storage`] - Link store (SQLite, in-memory)
//! - [`scheduler`] - Cycle clock, access-time distribution, proxy rotation, tick loop
//! - [`metrics`] - Prometheus counters for visits and rollovers
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use revisit::config::Config;
//! use revisit::crawler::HttpFetcher;
//! use revisit::parser::HtmlMetadataExtractor;
//! use revisit::scheduler::{EngineSettings, ProxyPool, Scheduler};
//! use revisit::storage::open_store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = open_store(&config.database)?;
//!     let fetcher = Arc::new(HttpFetcher::new(&config.http)?);
//!     let settings = EngineSettings::from_config(&config)?;
//!     let mut scheduler =
//!         Scheduler::builder(settings, store, fetcher, Arc::new(HtmlMetadataExtractor::new()))
//!             .proxy_pool(ProxyPool::from_config(&config.proxies))
//!             .build()?;
//!     let (_tx, rx) = tokio::sync::watch::channel(false);
//!     scheduler.run(rx).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crawler::{FetchRequest, FetchResponse, Fetcher, HttpFetcher};
    pub use crate::error::{Error, ErrorCategory, Result, RevisitErrorTrait};
    pub use crate::models::{AccessLogEntry, Link, LinkId, PageMetadata};
    pub use crate::parser::{HtmlMetadataExtractor, MetadataExtractor};
    pub use crate::scheduler::{EngineSettings, ProxyPool, Scheduler};
    pub use crate::storage::{LinkStore, SharedLinkStore};
}

// Direct re-exports for convenience
pub use models::{AccessLogEntry, Link, LinkId};
