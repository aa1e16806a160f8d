//! Unified error handling for the revisit crate
//!
//! Collects the domain errors of the fetcher, the extractor, the link store
//! and the scheduler into a single `Error` enum, while each module keeps its
//! own error type for local use.
//!
//! # Architecture
//!
//! - [`RevisitErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use revisit::error::{Error, RevisitErrorTrait};
//!
//! fn report(err: &Error) {
//!     tracing::warn!(category = %err.category(), recoverable = err.is_recoverable(), "{err}");
//! }
//! ```

use std::fmt;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::scheduler::error::SchedulerError;
pub use crate::utils::error::{ExtractError, FetchError, StoreError};

/// Common trait for all revisit error types
pub trait RevisitErrorTrait: std::error::Error {
    /// Check if this error clears up on its own by the next tick
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, proxy)
    Network,
    /// Page did not have the expected structure
    Parsing,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Scheduler and timing errors
    Scheduler,
}

impl ErrorCategory {
    /// Short lowercase label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the revisit crate
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Page extraction errors
    #[error("Extract error: {0}")]
    Extract(#[from] ExtractError),

    /// Link store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Scheduler and timing errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl RevisitErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Extract(_) => false,
            Self::Store(e) => e.is_inconsistency(),
            Self::Scheduler(e) => e.is_recoverable(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) => ErrorCategory::Network,
            Self::Extract(_) => ErrorCategory::Parsing,
            Self::Store(_) | Self::Scheduler(SchedulerError::Store(_)) => ErrorCategory::Storage,
            Self::Scheduler(SchedulerError::InvalidConfig { .. }) => ErrorCategory::Config,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
        }
    }
}

impl Error {
    /// HTTP status carried by the error, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Fetch(e) => e.status(),
            _ => None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
