//! Persistence for tracked links
//!
//! Links, their append-only access logs and the per-link proxy usage ledger
//! live in SQLite. The scheduler only sees the [`LinkStore`] trait.

pub mod repository;

use anyhow::{Context, Result};

use crate::config::DatabaseConfig;

pub use repository::{
    create_memory_store, create_sqlite_store, LinkStore, MemoryLinkStore, SharedLinkStore,
    SqliteLinkStore, StoreResult,
};

/// Open the SQLite store configured for this process
pub fn open_store(config: &DatabaseConfig) -> Result<SharedLinkStore> {
    create_sqlite_store(&config.sqlite_path).with_context(|| {
        format!(
            "Failed to open link store at {}",
            config.sqlite_path.display()
        )
    })
}
