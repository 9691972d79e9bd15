//! Prometheus metrics for GeoMesh nodes.
//!
//! All metrics follow the naming convention: `gm_<component>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: publishes, probes, malformed records, selection outcomes
//! - **Gauge**: live peers in the current snapshot
//! - **Histogram**: refresh duration

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // REGISTRY METRICS
    // =========================================================================

    /// Record publishes by outcome
    pub static ref REGISTRY_PUBLISHES: CounterVec = CounterVec::new(
        Opts::new("gm_registry_publishes_total", "Peer record publishes"),
        &["outcome"]  // outcome: ok/failed
    ).expect("metric creation failed");

    /// Registry entries skipped during refresh
    pub static ref MALFORMED_RECORDS: Counter = Counter::new(
        "gm_registry_malformed_records_total",
        "Registry entries that failed to decode and were skipped"
    ).expect("metric creation failed");

    // =========================================================================
    // DIRECTORY METRICS
    // =========================================================================

    /// Liveness probes by result
    pub static ref LIVENESS_PROBES: CounterVec = CounterVec::new(
        Opts::new("gm_liveness_probes_total", "Liveness probes by result"),
        &["status"]  // status: active/inactive
    ).expect("metric creation failed");

    /// Live peers in the current snapshot
    pub static ref LIVE_PEERS: Gauge = Gauge::new(
        "gm_directory_live_peers",
        "Number of peers in the current live snapshot"
    ).expect("metric creation failed");

    /// Refresh duration
    pub static ref REFRESH_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "gm_directory_refresh_duration_seconds",
            "Time spent scanning the registry and probing peers"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).expect("metric creation failed");

    // =========================================================================
    // SELECTION METRICS
    // =========================================================================

    /// Selection outcomes
    pub static ref SELECTION_RESULTS: CounterVec = CounterVec::new(
        Opts::new("gm_selection_results_total", "Peer selection outcomes"),
        &["outcome"]  // outcome: selected/none
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Calling it again is harmless.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(REGISTRY_PUBLISHES.clone()),
        Box::new(MALFORMED_RECORDS.clone()),
        Box::new(LIVENESS_PROBES.clone()),
        Box::new(LIVE_PEERS.clone()),
        Box::new(REFRESH_DURATION.clone()),
        Box::new(SELECTION_RESULTS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
