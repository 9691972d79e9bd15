//! # Telemetry Sources
//!
//! Measurements a node publishes about itself.
//!
//! - `simulated`: fixed location, random bandwidth and latency. Used for
//!   local clusters and tests.
//! - `system`: real measurements over the network (HTTP geolocation, HTTP
//!   download throughput, TCP connect round-trip).

mod simulated;
#[cfg(feature = "network")]
mod system;


pub use simulated::{SimulatedTelemetry, SIMULATED_BANDWIDTH_MBPS, SIMULATED_LATENCY_MS};
#[cfg(feature = "network")]
pub use system::{TcpLatencyProbe, DEFAULT_LATENCY_TARGET};
#[cfg(feature = "system-telemetry")]
pub use system::{
    HttpBandwidthProbe, IpInfoGeolocation, DEFAULT_BANDWIDTH_URL, DEFAULT_GEOLOCATION_URL,
};
