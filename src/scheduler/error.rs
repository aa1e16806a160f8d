//! Error types for the scheduler module

use std::fmt;

use crate::models::LinkId;
use crate::utils::error::StoreError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Engine configuration rejected
    InvalidConfig {
        field: String,
        reason: String,
    },

    /// Link does not exist
    LinkNotFound {
        id: LinkId,
    },

    /// Link is inactive
    LinkInactive {
        id: LinkId,
    },

    /// A visit for this link is already in flight
    LinkBusy {
        id: LinkId,
    },

    /// Quota of the current cycle is used up
    QuotaExhausted {
        id: LinkId,
        quota: u32,
    },

    /// Store failure while evaluating or recording a visit
    Store(StoreError),

    /// A visit task panicked or was aborted
    TaskFailed {
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { field, reason } => {
                write!(f, "Invalid scheduler config '{}': {}", field, reason)
            }
            Self::LinkNotFound { id } => write!(f, "Link {} not found", id),
            Self::LinkInactive { id } => write!(f, "Link {} is inactive", id),
            Self::LinkBusy { id } => write!(f, "Link {} already has a visit in flight", id),
            Self::QuotaExhausted { id, quota } => {
                write!(f, "Link {} already used its quota of {} visits this cycle", id, quota)
            }
            Self::Store(err) => write!(f, "Store error: {}", err),
            Self::TaskFailed { reason } => write!(f, "Visit task failed: {}", reason),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LinkNotFound(id) => Self::LinkNotFound { id },
            other => Self::Store(other),
        }
    }
}

impl SchedulerError {
    /// Create an invalid config error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable
    ///
    /// Recoverable errors are re-evaluated on the next tick.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::LinkBusy { .. } | Self::TaskFailed { .. } => true,
            Self::Store(err) => err.is_inconsistency(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_error() {
        let err = SchedulerError::invalid_config("quota", "must be positive");
        assert!(err.to_string().contains("quota"));
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn test_store_not_found_maps_to_link_not_found() {
        let err: SchedulerError = StoreError::LinkNotFound(9).into();
        assert!(matches!(err, SchedulerError::LinkNotFound { id: 9 }));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(SchedulerError::LinkBusy { id: 1 }.is_recoverable());
        let conflict: SchedulerError = StoreError::CounterConflict {
            link_id: 1,
            expected: 0,
            actual: 1,
        }
        .into();
        assert!(conflict.is_recoverable());
        assert!(!SchedulerError::QuotaExhausted { id: 1, quota: 100 }.is_recoverable());
    }
}
