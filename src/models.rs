// Core data structures for revisit

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a tracked link
pub type LinkId = i64;

/// A tracked URL under active visitation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub url: String,
    pub date_added: DateTime<Utc>,
    pub cycle_number: u32, // starts at 1
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub period_views: u32, // visits completed in the current cycle
    pub total_views: u64,  // lifetime counter
    pub active: bool,
    pub filename: Option<String>,
    pub file_details: Option<String>,
}

impl Link {
    /// Create a fresh link in its first cycle
    pub fn new(id: LinkId, url: impl Into<String>, now: DateTime<Utc>, cycle_length: Duration) -> Self {
        Self {
            id,
            url: url.into(),
            date_added: now,
            cycle_number: 1,
            cycle_start: now,
            cycle_end: now + cycle_length,
            period_views: 0,
            total_views: 0,
            active: true,
            filename: None,
            file_details: None,
        }
    }

    /// Length of the current cycle window
    pub fn cycle_length(&self) -> Duration {
        self.cycle_end - self.cycle_start
    }

    /// Days left in the current cycle, rounded to one decimal (negative once expired)
    pub fn days_remaining(&self, now: DateTime<Utc>) -> f64 {
        let secs = (self.cycle_end - now).num_seconds() as f64;
        (secs / 86_400.0 * 10.0).round() / 10.0
    }
}

/// One recorded visit attempt (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub id: i64,
    pub link_id: LinkId,
    pub access_time: DateTime<Utc>,
    pub proxy_used: Option<String>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub cycle: u32,
}

impl AccessLogEntry {
    /// Whether the attempt ended with a 2xx status and no error
    pub fn is_success(&self) -> bool {
        self.error_message.is_none()
            && self
                .status_code
                .map(|code| (200..300).contains(&code))
                .unwrap_or(false)
    }
}

/// Insert form of an access log entry
///
/// The cycle number is filled in by the store from the link row inside the
/// same transaction that increments the counters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewAccessLog {
    pub access_time: DateTime<Utc>,
    pub proxy_used: Option<String>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
}

impl NewAccessLog {
    /// Successful (or at least answered) visit
    pub fn answered(access_time: DateTime<Utc>, proxy: Option<String>, status: u16) -> Self {
        Self {
            access_time,
            proxy_used: proxy,
            status_code: Some(status),
            error_message: None,
        }
    }

    /// Visit that failed, optionally after the server answered
    pub fn failed(
        access_time: DateTime<Utc>,
        proxy: Option<String>,
        status: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            access_time,
            proxy_used: proxy,
            status_code: status,
            error_message: Some(error.into()),
        }
    }
}

/// Most recent use of a proxy against a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyUsageRecord {
    pub link_id: LinkId,
    pub proxy: String,
    pub used_at: DateTime<Utc>,
}

/// Counters after a visit was committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitRecord {
    pub log_id: i64,
    pub cycle: u32,
    pub period_views: u32,
    pub total_views: u64,
}

/// Filename and description scraped from a link page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub filename: String,
    pub details: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_new_link_starts_in_first_cycle() {
        let link = Link::new(7, "https://example.com/f/abc", t0(), Duration::days(45));
        assert_eq!(link.cycle_number, 1);
        assert_eq!(link.period_views, 0);
        assert_eq!(link.total_views, 0);
        assert!(link.active);
        assert_eq!(link.cycle_length(), Duration::days(45));
    }

    #[test]
    fn test_days_remaining() {
        let link = Link::new(1, "u", t0(), Duration::days(45));
        assert_eq!(link.days_remaining(t0()), 45.0);
        assert_eq!(link.days_remaining(t0() + Duration::hours(36)), 43.5);
        assert!(link.days_remaining(t0() + Duration::days(46)) < 0.0);
    }

    #[test]
    fn test_log_entry_success() {
        let mut entry = AccessLogEntry {
            id: 1,
            link_id: 1,
            access_time: t0(),
            proxy_used: None,
            status_code: Some(200),
            error_message: None,
            cycle: 1,
        };
        assert!(entry.is_success());

        entry.status_code = Some(503);
        assert!(!entry.is_success());

        entry.status_code = Some(200);
        entry.error_message = Some("Download button not found".to_string());
        assert!(!entry.is_success());
    }
}
