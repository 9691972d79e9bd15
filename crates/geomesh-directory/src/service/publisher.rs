use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use geomesh_telemetry::{metric_inc, REGISTRY_PUBLISHES};

use crate::domain::{PeerId, PeerRecord, PublishError, TelemetryError};
use crate::ports::{BandwidthSource, GeolocationSource, LatencySource, RegistryStore, TimeSource};

/// Default time between two publishes.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(30);

/// Where the publisher is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublisherState {
    /// Waiting for the next tick.
    #[default]
    Idle,
    /// Collecting location, bandwidth and latency.
    Gathering,
    /// Writing the record to the registry.
    Publishing,
}

/// The three local measurement sources.
#[derive(Clone)]
pub struct TelemetrySources {
    /// Location of this node.
    pub geolocation: Arc<dyn GeolocationSource>,
    /// Link capacity.
    pub bandwidth: Arc<dyn BandwidthSource>,
    /// Round-trip latency.
    pub latency: Arc<dyn LatencySource>,
}

/// Periodically publishes this node's record.
///
/// `idle -> gathering -> publishing -> idle` once per tick. A failing source
/// leaves its field absent; a failing registry write is logged and retried
/// on the next tick only.
pub struct StatusPublisher {
    local_id: PeerId,
    registry: Arc<dyn RegistryStore>,
    sources: TelemetrySources,
    time_source: Arc<dyn TimeSource>,
    interval: Duration,
    state: watch::Sender<PublisherState>,
}

impl StatusPublisher {
    /// Create a publisher for `local_id`.
    pub fn new(
        local_id: PeerId,
        registry: Arc<dyn RegistryStore>,
        sources: TelemetrySources,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let (state, _) = watch::channel(PublisherState::Idle);
        Self {
            local_id,
            registry,
            sources,
            time_source,
            interval: DEFAULT_PUBLISH_INTERVAL,
            state,
        }
    }

    /// Override the publish interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Current cycle state.
    pub fn state(&self) -> PublisherState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<PublisherState> {
        self.state.subscribe()
    }

    /// Collect every measurement concurrently.
    ///
    /// The returned record has no meaningful `updated_at` yet.
    async fn gather(&self) -> PeerRecord {
        self.state.send_replace(PublisherState::Gathering);

        let (location, bandwidth, latency) = tokio::join!(
            self.sources.geolocation.locate(),
            self.sources.bandwidth.measure_bandwidth(),
            self.sources.latency.measure_latency(),
        );

        let mut record = PeerRecord::new(self.local_id.clone(), self.time_source.now());
        record.location = measurement(location);
        record.bandwidth = measurement(bandwidth);
        record.latency_ms = measurement(latency).and_then(|ms| {
            if ms.is_finite() && ms >= 0.0 {
                Some(ms)
            } else {
                warn!(latency_ms = ms, "Discarding invalid latency measurement");
                None
            }
        });
        record
    }

    /// Run one full cycle and return the record that was published.
    pub async fn publish_once(&self) -> Result<PeerRecord, PublishError> {
        let mut record = self.gather().await;

        self.state.send_replace(PublisherState::Publishing);
        record.updated_at = self.time_source.now();
        let result = self.put(&record).await;
        self.state.send_replace(PublisherState::Idle);

        match result {
            Ok(()) => {
                metric_inc!(REGISTRY_PUBLISHES, &["ok"]);
                debug!(
                    peer_id = %record.id,
                    located = record.location.is_some(),
                    bandwidth = record.bandwidth.is_some(),
                    latency = record.latency_ms.is_some(),
                    "Published peer record"
                );
                Ok(record)
            }
            Err(err) => {
                metric_inc!(REGISTRY_PUBLISHES, &["failed"]);
                Err(err)
            }
        }
    }

    async fn put(&self, record: &PeerRecord) -> Result<(), PublishError> {
        let value = record.encode()?;
        self.registry.put(&record.registry_key(), value).await?;
        Ok(())
    }

    /// Publish every interval until `shutdown` flips or its sender is dropped.
    ///
    /// Missed ticks are skipped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            peer_id = %self.local_id,
            interval_secs = self.interval.as_secs(),
            "Status publisher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.publish_once().await {
                        warn!(error = %err, "Publish failed, retrying on next tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Status publisher stopped");
                        break;
                    }
                }
            }
        }
    }
}

/// Keep a successful measurement, log and drop a failed one.
fn measurement<T>(result: Result<T, TelemetryError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(error = %err, "Telemetry source failed, publishing without it");
            None
        }
    }
}
