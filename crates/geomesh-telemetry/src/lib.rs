//! # GeoMesh Telemetry
//!
//! Logging and metrics for GeoMesh nodes.
//!
//! - Structured logs through `tracing`, pretty or JSON
//! - Prometheus metrics in a process-wide registry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use geomesh_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_telemetry(&config).expect("Failed to init telemetry");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GM_SERVICE_NAME` | `geomesh` | Service name in logs |
//! | `GM_LOG_LEVEL` | `info` | Log filter, falls back to `RUST_LOG` |
//! | `GM_JSON_LOGS` | `false` | JSON log lines |
//! | `GM_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `GM_METRICS_PORT` | `9100` | Prometheus endpoint port, 0 disables |

#![warn(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, LIVENESS_PROBES, LIVE_PEERS,
    MALFORMED_RECORDS, REFRESH_DURATION, REGISTRY_PUBLISHES, SELECTION_RESULTS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Metrics could not be registered or encoded.
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Register metrics and install the log subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
