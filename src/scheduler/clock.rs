//! Cycle bookkeeping for tracked links
//!
//! Pure functions over a link's cycle window and quota counters. Rollover is
//! applied lazily: whoever first observes a link past its `cycle_end` moves it
//! into the next cycle, there is no background timer.

use chrono::{DateTime, Duration, Utc};

use super::error::{SchedulerError, SchedulerResult};
use crate::config::Config;
use crate::models::Link;

/// Quota and cycle lengths applied to every link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePolicy {
    /// Visits counted per cycle
    pub quota: u32,

    /// Length of the first cycle, fixed when the link is added
    pub initial_length: Duration,

    /// Length of every cycle started by a rollover
    pub rollover_length: Duration,
}

impl Default for CyclePolicy {
    fn default() -> Self {
        Self {
            quota: 100,
            initial_length: Duration::days(45),
            rollover_length: Duration::days(45),
        }
    }
}

impl CyclePolicy {
    /// Build a policy from the application config
    pub fn from_config(config: &Config) -> SchedulerResult<Self> {
        Self::new(
            config.engine.quota,
            config.initial_cycle_length(),
            config.rollover_cycle_length(),
        )
    }

    /// Create a validated policy
    pub fn new(quota: u32, initial_length: Duration, rollover_length: Duration) -> SchedulerResult<Self> {
        if quota == 0 {
            return Err(SchedulerError::invalid_config("quota", "must be at least 1"));
        }
        if initial_length <= Duration::zero() {
            return Err(SchedulerError::invalid_config(
                "initial_length",
                "must be positive",
            ));
        }
        if rollover_length <= Duration::zero() {
            return Err(SchedulerError::invalid_config(
                "rollover_length",
                "must be positive",
            ));
        }
        Ok(Self {
            quota,
            initial_length,
            rollover_length,
        })
    }
}

/// True iff `now` is strictly past the end of the link's cycle
pub fn is_cycle_expired(link: &Link, now: DateTime<Utc>) -> bool {
    now > link.cycle_end
}

/// Move a link into its next cycle starting at `now`
pub fn rollover(link: &Link, now: DateTime<Utc>, length: Duration) -> Link {
    Link {
        cycle_number: link.cycle_number + 1,
        cycle_start: now,
        cycle_end: now + length,
        period_views: 0,
        ..link.clone()
    }
}

/// True once the link has used every visit of its cycle
pub fn is_quota_exhausted(link: &Link, quota: u32) -> bool {
    link.period_views >= quota
}

/// Index of the next unvisited slot, `None` when the quota is used up
///
/// The slot index is the completed-visit counter itself, so the schedule can
/// always be recomputed from the cycle window without a stored cursor.
pub fn next_slot(link: &Link, quota: u32) -> Option<usize> {
    if is_quota_exhausted(link, quota) {
        None
    } else {
        Some(link.period_views as usize)
    }
}

/// Visits still available in the current cycle
pub fn remaining_visits(link: &Link, quota: u32) -> u32 {
    quota.saturating_sub(link.period_views)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn link() -> Link {
        Link::new(1, "https://example.com/f/1", t0(), Duration::days(45))
    }

    #[test]
    fn test_expiry_is_strict() {
        let link = link();
        assert!(!is_cycle_expired(&link, t0()));
        assert!(!is_cycle_expired(&link, link.cycle_end));
        assert!(is_cycle_expired(&link, link.cycle_end + Duration::seconds(1)));
    }

    #[test]
    fn test_rollover_resets_window_and_views() {
        let mut link = link();
        link.period_views = 100;
        link.total_views = 250;
        let now = link.cycle_end + Duration::hours(3);

        let next = rollover(&link, now, Duration::days(60));

        assert_eq!(next.cycle_number, 2);
        assert_eq!(next.period_views, 0);
        assert_eq!(next.total_views, 250);
        assert_eq!(next.cycle_start, now);
        assert_eq!(next.cycle_end, now + Duration::days(60));
        assert!(next.cycle_end > next.cycle_start);
        assert_eq!(next.url, link.url);
    }

    #[test]
    fn test_next_slot_follows_counter() {
        let mut link = link();
        assert_eq!(next_slot(&link, 100), Some(0));
        link.period_views = 42;
        assert_eq!(next_slot(&link, 100), Some(42));
        assert_eq!(remaining_visits(&link, 100), 58);
        link.period_views = 100;
        assert_eq!(next_slot(&link, 100), None);
        assert!(is_quota_exhausted(&link, 100));
        assert_eq!(remaining_visits(&link, 100), 0);
    }

    #[test]
    fn test_policy_validation() {
        assert!(CyclePolicy::new(0, Duration::days(1), Duration::days(1)).is_err());
        assert!(CyclePolicy::new(1, Duration::zero(), Duration::days(1)).is_err());
        assert!(CyclePolicy::new(1, Duration::days(1), Duration::seconds(-5)).is_err());
        let policy = CyclePolicy::from_config(&Config::default()).unwrap();
        assert_eq!(policy, CyclePolicy::default());
    }
}
