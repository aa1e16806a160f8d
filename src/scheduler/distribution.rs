//! Access-time distribution within a cycle
//!
//! Spreads a cycle's quota of visits over its window along an exponential
//! decay curve: visits are packed near the start of the cycle and thin out
//! toward its end.
//!
//! For visit `i` of `quota` the normalized index is `x = i / (quota - 1)`
//! (`x = 0` for a single visit) and the curve value is
//!
//! ```text
//! y = (1 - e^(-k(1 - x))) / (1 - e^(-k))
//! ```
//!
//! `y` falls from 1 at `x = 0` to 0 at `x = 1`; the visit is placed at the
//! fraction `1 - y` of the window, so the first visit is due at `cycle_start`
//! and the last one exactly at `cycle_end`.
//!
//! The function is pure: same window, quota and skew always give the same
//! schedule, which lets the scheduler recompute it every tick instead of
//! persisting it.

use chrono::{DateTime, Duration, Utc};

use super::clock::next_slot;
use crate::models::Link;

/// Default skew constant of the decay curve
pub const DEFAULT_SKEW: f64 = 3.0;

/// Exponential decay curve used to place visits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayCurve {
    k: f64,
}

impl Default for DecayCurve {
    fn default() -> Self {
        Self { k: DEFAULT_SKEW }
    }
}

impl DecayCurve {
    /// Create a curve with skew `k`
    ///
    /// Returns `None` unless `k` is finite and positive.
    pub fn new(k: f64) -> Option<Self> {
        (k.is_finite() && k > 0.0).then_some(Self { k })
    }

    /// Skew constant
    pub fn skew(&self) -> f64 {
        self.k
    }

    /// Raw curve value `y` for a normalized index `x` in `[0, 1]`
    pub fn value(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);
        (1.0 - (-self.k * (1.0 - x)).exp()) / (1.0 - (-self.k).exp())
    }

    /// Fraction of the window at which visit `index` of `quota` falls
    pub fn position(&self, index: usize, quota: usize) -> f64 {
        let x = if quota <= 1 {
            0.0
        } else {
            index as f64 / (quota - 1) as f64
        };
        (1.0 - self.value(x)).clamp(0.0, 1.0)
    }

    /// Timestamps of every visit in `[start, end]`, sorted ascending
    pub fn access_times(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        quota: usize,
    ) -> Vec<DateTime<Utc>> {
        let total_ms = (end - start).num_milliseconds().max(0);

        let mut times: Vec<DateTime<Utc>> = (0..quota)
            .map(|i| {
                let offset_ms = (self.position(i, quota) * total_ms as f64).round() as i64;
                let at = start + Duration::milliseconds(offset_ms.clamp(0, total_ms));
                at.min(end).max(start)
            })
            .collect();

        // Monotonic by construction for k > 0; sorted anyway so a curve change
        // can never hand the scheduler an out-of-order slot list.
        times.sort();
        times
    }
}

/// Compute the visit schedule of one cycle with skew `k`
///
/// Falls back to [`DEFAULT_SKEW`] when `k` is not a positive finite number.
pub fn compute_access_times(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    quota: u32,
    k: f64,
) -> Vec<DateTime<Utc>> {
    let curve = DecayCurve::new(k).unwrap_or_default();
    curve.access_times(start, end, quota as usize)
}

/// When the link's next visit is due, `None` if its quota is used up
pub fn next_due_time(link: &Link, quota: u32, k: f64) -> Option<DateTime<Utc>> {
    let slot = next_slot(link, quota)?;
    compute_access_times(link.cycle_start, link.cycle_end, quota, k)
        .get(slot)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_three_visits_over_five_minutes() {
        let start = t0();
        let end = start + Duration::seconds(300);

        let times = compute_access_times(start, end, 3, 3.0);
        let offsets: Vec<i64> = times
            .iter()
            .map(|t| (*t - start).num_milliseconds())
            .collect();

        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[2], 300_000);
        assert!(offsets[0] < offsets[1] && offsets[1] < offsets[2]);
        // (e^-1.5 - e^-3) / (1 - e^-3) * 300s ~= 54.7s
        assert!((offsets[1] - 54_730).abs() < 100, "middle offset {}", offsets[1]);
    }

    #[test]
    fn test_single_visit_is_due_at_start() {
        let start = t0();
        let times = compute_access_times(start, start + Duration::days(45), 1, 3.0);
        assert_eq!(times, vec![start]);
    }

    #[test]
    fn test_zero_quota_is_empty() {
        assert!(compute_access_times(t0(), t0() + Duration::days(1), 0, 3.0).is_empty());
    }

    #[test]
    fn test_schedule_is_front_loaded() {
        let start = t0();
        let end = start + Duration::days(45);
        let times = compute_access_times(start, end, 100, 3.0);
        let midpoint = start + Duration::days(45) / 2;

        let first_half = times.iter().filter(|t| **t <= midpoint).count();
        assert!(first_half > 50, "only {first_half} visits in the first half");

        let first_gap = times[1] - times[0];
        let last_gap = times[99] - times[98];
        assert!(first_gap < last_gap);
    }

    #[test]
    fn test_higher_skew_packs_more_visits_early() {
        let start = t0();
        let end = start + Duration::days(45);
        let midpoint = start + Duration::days(45) / 2;
        let early = |k| {
            compute_access_times(start, end, 100, k)
                .iter()
                .filter(|t| **t <= midpoint)
                .count()
        };
        assert!(early(6.0) > early(3.0));
        assert!(early(3.0) > early(1.0));
    }

    #[test]
    fn test_invalid_skew_falls_back_to_default() {
        let start = t0();
        let end = start + Duration::hours(10);
        assert_eq!(
            compute_access_times(start, end, 10, -1.0),
            compute_access_times(start, end, 10, DEFAULT_SKEW)
        );
        assert!(DecayCurve::new(f64::INFINITY).is_none());
    }

    #[test]
    fn test_next_due_time_tracks_period_views() {
        let mut link = Link::new(1, "u", t0(), Duration::seconds(300));
        assert_eq!(next_due_time(&link, 3, 3.0), Some(t0()));

        link.period_views = 2;
        assert_eq!(next_due_time(&link, 3, 3.0), Some(t0() + Duration::seconds(300)));

        link.period_views = 3;
        assert_eq!(next_due_time(&link, 3, 3.0), None);
    }

    #[test]
    fn test_curve_endpoints() {
        let curve = DecayCurve::default();
        assert!((curve.value(0.0) - 1.0).abs() < 1e-12);
        assert!(curve.value(1.0).abs() < 1e-12);
        assert_eq!(curve.position(0, 5), 0.0);
        assert!((curve.position(4, 5) - 1.0).abs() < 1e-12);
    }
}
