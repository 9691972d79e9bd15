use std::sync::Arc;
use std::time::Duration;

use geomesh_telemetry::{log_peer_event, metric_inc, LIVENESS_PROBES};

use crate::domain::{LivenessState, LivenessStatus, PeerId};
use crate::ports::{ProbeTransport, TimeSource};

/// Default deadline for one ping exchange.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks peer reachability and records the outcome.
///
/// A probe never fails: every transport error and every timeout is folded
/// into `LivenessStatus::Inactive`.
#[derive(Clone)]
pub struct LivenessProbe {
    transport: Arc<dyn ProbeTransport>,
    state: LivenessState,
    time_source: Arc<dyn TimeSource>,
    timeout: Duration,
}

impl LivenessProbe {
    /// Create a prober writing into `state`.
    pub fn new(
        transport: Arc<dyn ProbeTransport>,
        state: LivenessState,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            transport,
            state,
            time_source,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Override the per-probe deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Liveness map this prober writes to.
    pub fn state(&self) -> &LivenessState {
        &self.state
    }

    /// Ping `peer` once and record the result.
    pub async fn probe(&self, peer: &PeerId) -> LivenessStatus {
        let status = match tokio::time::timeout(self.timeout, self.transport.ping(peer)).await {
            Ok(Ok(())) => LivenessStatus::Active,
            Ok(Err(err)) => {
                log_peer_event!(debug, "probe", "Ping failed", peer, error = %err);
                LivenessStatus::Inactive
            }
            Err(_) => {
                log_peer_event!(
                    debug,
                    "probe",
                    "Ping timed out",
                    peer,
                    timeout_ms = self.timeout.as_millis() as u64
                );
                LivenessStatus::Inactive
            }
        };

        let entry = self.state.record(peer, status, self.time_source.now());
        metric_inc!(LIVENESS_PROBES, &[status.as_str()]);

        if entry.consecutive_failures > 0 && entry.consecutive_failures % 3 == 0 {
            log_peer_event!(
                warn,
                "probe",
                "Peer keeps failing liveness probes",
                peer,
                consecutive_failures = entry.consecutive_failures
            );
        }

        status
    }
}
