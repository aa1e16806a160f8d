//! Prometheus metrics for the revisit engine
//!
//! Tracks the scheduling loop and the visits it dispatches:
//! - Visits by result (success, fetch failure, store conflict)
//! - Proxy pool exhaustion and cycle rollovers
//! - In-flight visits and tick duration
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.
//!
//! `revisit run` dumps the registry to a snapshot file on an interval;
//! `revisit metrics` prints that file.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::path::Path;
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all engine metrics
struct EngineMetrics {
    visits: CounterVec,
    proxy_exhaustion: Counter,
    rollovers: Counter,
    store_conflicts: Counter,
    in_flight: Gauge,
    tick_duration: Histogram,
}

/// Global storage for engine metrics
static ENGINE_METRICS: OnceLock<EngineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

/// Outcome label of a finished visit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    /// Page and download both answered 2xx
    Success,
    /// Network error, timeout, non-2xx or missing download affordance
    Failed,
    /// Counter CAS lost, nothing recorded
    Conflict,
}

impl VisitResult {
    fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
/// On failure the error is returned and every metric operation stays a no-op.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let engine = EngineMetrics {
        visits: register_counter_vec!(
            "revisit_visits_total",
            "Total visits dispatched by result",
            &["result"]
        )?,
        proxy_exhaustion: register_counter!(
            "revisit_proxy_exhaustion_total",
            "Visits that reused a proxy because the whole pool was cooling down"
        )?,
        rollovers: register_counter!(
            "revisit_cycle_rollovers_total",
            "Links moved into a new cycle"
        )?,
        store_conflicts: register_counter!(
            "revisit_store_conflicts_total",
            "Visits dropped because the counters changed underneath them"
        )?,
        in_flight: register_gauge!(
            "revisit_visits_in_flight",
            "Visits currently running"
        )?,
        tick_duration: register_histogram!(
            "revisit_tick_duration_seconds",
            "Time spent evaluating one scheduling tick",
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
        )?,
    };

    ENGINE_METRICS
        .set(engine)
        .map_err(|_| "Engine metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    ENGINE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Write the current metrics to `path` in text format
///
/// The file is replaced through a rename, so readers never see a half
/// written snapshot.
pub fn write_snapshot(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let text = encode_metrics()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a snapshot written by a running scheduler, `None` if there is none yet
pub fn read_snapshot(path: &Path) -> std::io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Record a finished visit
pub fn record_visit(result: VisitResult) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.visits.with_label_values(&[result.label()]).inc();
    }
}

/// Record a proxy chosen from an exhausted pool
pub fn record_proxy_exhaustion() {
    if let Some(m) = ENGINE_METRICS.get() {
        m.proxy_exhaustion.inc();
    }
}

/// Record a cycle rollover
pub fn record_rollover() {
    if let Some(m) = ENGINE_METRICS.get() {
        m.rollovers.inc();
    }
}

/// Record a lost counter compare-and-set
pub fn record_store_conflict() {
    if let Some(m) = ENGINE_METRICS.get() {
        m.store_conflicts.inc();
    }
}

/// Gauge guard: counts one in-flight visit for as long as it lives
pub struct InFlightGuard {
    active: bool,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.active {
            if let Some(m) = ENGINE_METRICS.get() {
                m.in_flight.dec();
            }
        }
    }
}

/// Mark a visit as in flight until the returned guard is dropped
pub fn track_in_flight() -> InFlightGuard {
    match ENGINE_METRICS.get() {
        Some(m) => {
            m.in_flight.inc();
            InFlightGuard { active: true }
        }
        None => InFlightGuard { active: false },
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a tick timer (returns a timer handle)
pub fn start_tick_timer() -> MetricsTimer {
    match ENGINE_METRICS.get() {
        Some(m) => MetricsTimer::new(m.tick_duration.start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
