use std::ops::Range;

use async_trait::async_trait;
use rand::Rng;

use crate::domain::{Bandwidth, Location, TelemetryError};
use crate::ports::{BandwidthSource, GeolocationSource, LatencySource};

/// Range of simulated downstream bandwidth.
pub const SIMULATED_BANDWIDTH_MBPS: Range<f64> = 10.0..110.0;

/// Range of simulated round-trip latency.
pub const SIMULATED_LATENCY_MS: Range<f64> = 5.0..150.0;

/// Telemetry for nodes without real measurements.
///
/// Reports a configured location, a random downstream bandwidth in
/// [`SIMULATED_BANDWIDTH_MBPS`] and a random latency in
/// [`SIMULATED_LATENCY_MS`]. Upstream bandwidth is never reported.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTelemetry {
    location: Option<Location>,
}

impl SimulatedTelemetry {
    /// Simulate a node at `location`.
    pub fn at(location: Location) -> Self {
        Self {
            location: Some(location),
        }
    }

    /// Simulate a node whose geolocation always fails.
    pub fn unlocated() -> Self {
        Self::default()
    }
}

fn sample(range: Range<f64>) -> f64 {
    rand::thread_rng().gen_range(range)
}

#[async_trait]
impl GeolocationSource for SimulatedTelemetry {
    async fn locate(&self) -> Result<Location, TelemetryError> {
        self.location
            .clone()
            .ok_or_else(|| TelemetryError::unavailable("geolocation", "no simulated location"))
    }
}

#[async_trait]
impl BandwidthSource for SimulatedTelemetry {
    async fn measure_bandwidth(&self) -> Result<Bandwidth, TelemetryError> {
        let down = sample(SIMULATED_BANDWIDTH_MBPS);
        Bandwidth::new(down, None)
            .map_err(|err| TelemetryError::unavailable("bandwidth", err.to_string()))
    }
}

#[async_trait]
impl LatencySource for SimulatedTelemetry {
    async fn measure_latency(&self) -> Result<f64, TelemetryError> {
        Ok(sample(SIMULATED_LATENCY_MS))
    }
}
