//! Error types for the revisit engine collaborators
//!
//! This module defines the error types raised by the fetcher, the metadata
//! extractor and the link store.

use thiserror::Error;

use crate::models::LinkId;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Non-2xx status
    #[error("Unexpected status: {0}")]
    Status(u16),

    /// Proxy could not be configured
    #[error("Invalid proxy '{proxy}': {reason}")]
    Proxy { proxy: String, reason: String },

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Status code carried by the error, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(code) => Some(*code),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Check if the error is transient
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout => true,
            Self::Status(code) => matches!(code, 429 | 500 | 502 | 503 | 504),
            Self::Proxy { .. } | Self::InvalidUrl(_) => false,
        }
    }
}

/// Errors that can occur while extracting metadata from a page
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// Filename element not found
    #[error("Filename element not found")]
    FilenameNotFound,

    /// Download button not found
    #[error("Download button not found")]
    DownloadButtonNotFound,

    /// Download button has no target
    #[error("No href in download button")]
    DownloadTargetMissing,

    /// Relative link could not be resolved
    #[error("Cannot resolve '{href}' against '{base}'")]
    Unresolvable { base: String, href: String },
}

/// Errors raised by link store implementations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Link does not exist (deleted mid-tick)
    #[error("Link {0} not found")]
    LinkNotFound(LinkId),

    /// Counter moved underneath us
    #[error("Counter conflict on link {link_id}: expected {expected} period views, found {actual}")]
    CounterConflict {
        link_id: LinkId,
        expected: u32,
        actual: u32,
    },

    /// Increment would exceed the cycle quota
    #[error("Link {link_id} already reached its quota of {quota} visits")]
    QuotaExceeded { link_id: LinkId, quota: u32 },

    /// Underlying database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error while preparing storage
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Inconsistencies resolve themselves on the next tick
    pub fn is_inconsistency(&self) -> bool {
        matches!(
            self,
            Self::LinkNotFound(_)
                | Self::CounterConflict { .. }
                | Self::QuotaExceeded { .. }
        )
    }
}
