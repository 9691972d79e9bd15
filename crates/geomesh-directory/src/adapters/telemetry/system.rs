use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::domain::TelemetryError;
use crate::ports::LatencySource;

#[cfg(feature = "system-telemetry")]
pub use http::{
    HttpBandwidthProbe, IpInfoGeolocation, DEFAULT_BANDWIDTH_URL, DEFAULT_GEOLOCATION_URL,
};

/// Host used for latency measurement when none is configured.
pub const DEFAULT_LATENCY_TARGET: &str = "8.8.8.8:53";

const LATENCY_TIMEOUT: Duration = Duration::from_secs(5);

/// Latency as the TCP connect round-trip to a well known host.
#[derive(Debug, Clone)]
pub struct TcpLatencyProbe {
    target: String,
    timeout: Duration,
}

impl TcpLatencyProbe {
    /// Measure against `target` (`host:port`).
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            timeout: LATENCY_TIMEOUT,
        }
    }

    /// Override the connect deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for TcpLatencyProbe {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_TARGET)
    }
}

#[async_trait]
impl LatencySource for TcpLatencyProbe {
    async fn measure_latency(&self) -> Result<f64, TelemetryError> {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_stream)) => {
                let ms = started.elapsed().as_secs_f64() * 1000.0;
                debug!(target_addr = %self.target, latency_ms = ms, "Measured latency");
                Ok(ms)
            }
            Ok(Err(err)) => Err(TelemetryError::unavailable("latency", err.to_string())),
            Err(_) => Err(TelemetryError::unavailable(
                "latency",
                format!("no answer from {} within {:?}", self.target, self.timeout),
            )),
        }
    }
}

#[cfg(feature = "system-telemetry")]
mod http {
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use reqwest::Client;
    use serde::Deserialize;
    use tracing::debug;

    use crate::domain::{Bandwidth, Coordinate, Location, TelemetryError};
    use crate::ports::{BandwidthSource, GeolocationSource};

    /// ipinfo-style endpoint answering `{"loc": "lat,lon", ...}`.
    pub const DEFAULT_GEOLOCATION_URL: &str = "https://ipinfo.io/json";

    /// Endpoint serving a fixed-size download for throughput measurement.
    pub const DEFAULT_BANDWIDTH_URL: &str = "https://speed.cloudflare.com/__down?bytes=5000000";

    const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    fn client(source_name: &'static str) -> Result<Client, TelemetryError> {
        Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| TelemetryError::unavailable(source_name, err.to_string()))
    }

    #[derive(Debug, Deserialize)]
    struct IpInfoResponse {
        loc: Option<String>,
        #[serde(default)]
        city: String,
        #[serde(default)]
        region: String,
        #[serde(default)]
        country: String,
    }

    /// Parse an ipinfo `loc` field (`"lat,lon"`).
    pub(crate) fn parse_loc(loc: &str) -> Result<Coordinate, TelemetryError> {
        let bad = |reason: String| TelemetryError::unavailable("geolocation", reason);

        let (lat, lon) = loc
            .split_once(',')
            .ok_or_else(|| bad(format!("malformed loc {loc:?}")))?;
        let lat: f64 = lat
            .trim()
            .parse()
            .map_err(|_| bad(format!("malformed latitude in {loc:?}")))?;
        let lon: f64 = lon
            .trim()
            .parse()
            .map_err(|_| bad(format!("malformed longitude in {loc:?}")))?;

        Coordinate::new(lat, lon).map_err(|err| bad(err.to_string()))
    }

    /// Geolocation by public IP address.
    #[derive(Debug, Clone)]
    pub struct IpInfoGeolocation {
        client: Client,
        url: String,
    }

    impl IpInfoGeolocation {
        /// Query `url`, usually [`DEFAULT_GEOLOCATION_URL`].
        pub fn new(url: impl Into<String>) -> Result<Self, TelemetryError> {
            Ok(Self {
                client: client("geolocation")?,
                url: url.into(),
            })
        }
    }

    #[async_trait]
    impl GeolocationSource for IpInfoGeolocation {
        async fn locate(&self) -> Result<Location, TelemetryError> {
            let unavailable =
                |err: reqwest::Error| TelemetryError::unavailable("geolocation", err.to_string());

            let info: IpInfoResponse = self
                .client
                .get(&self.url)
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(unavailable)?
                .json()
                .await
                .map_err(unavailable)?;

            let loc = info
                .loc
                .ok_or_else(|| TelemetryError::unavailable("geolocation", "response has no loc"))?;
            let coordinate = parse_loc(&loc)?;

            Ok(Location::at(coordinate).with_place(info.city, info.region, info.country))
        }
    }

    /// Downstream bandwidth from the time taken to fetch a test payload.
    ///
    /// Upstream is not measured.
    #[derive(Debug, Clone)]
    pub struct HttpBandwidthProbe {
        client: Client,
        url: String,
    }

    impl HttpBandwidthProbe {
        /// Download from `url`, usually [`DEFAULT_BANDWIDTH_URL`].
        pub fn new(url: impl Into<String>) -> Result<Self, TelemetryError> {
            Ok(Self {
                client: client("bandwidth")?,
                url: url.into(),
            })
        }
    }

    #[async_trait]
    impl BandwidthSource for HttpBandwidthProbe {
        async fn measure_bandwidth(&self) -> Result<Bandwidth, TelemetryError> {
            let unavailable =
                |err: reqwest::Error| TelemetryError::unavailable("bandwidth", err.to_string());

            let started = Instant::now();
            let body = self
                .client
                .get(&self.url)
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(unavailable)?
                .bytes()
                .await
                .map_err(unavailable)?;
            let elapsed = started.elapsed().as_secs_f64();

            if body.is_empty() || elapsed <= 0.0 {
                return Err(TelemetryError::unavailable("bandwidth", "empty download"));
            }

            let down_mbps = (body.len() as f64 * 8.0) / elapsed / 1_000_000.0;
            debug!(bytes = body.len(), elapsed_secs = elapsed, down_mbps, "Measured bandwidth");

            Bandwidth::new(down_mbps, None)
                .map_err(|err| TelemetryError::unavailable("bandwidth", err.to_string()))
        }
    }
}

#[cfg(all(test, feature = "system-telemetry"))]
pub(super) use http::parse_loc;
