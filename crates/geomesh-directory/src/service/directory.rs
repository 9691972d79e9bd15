use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use geomesh_telemetry::{
    metric_inc, HistogramTimer, LIVE_PEERS, MALFORMED_RECORDS, REFRESH_DURATION,
    SELECTION_RESULTS,
};

use super::prober::{LivenessProbe, DEFAULT_PROBE_TIMEOUT};
use crate::domain::{
    Coordinate, DirectoryError, DirectorySnapshot, LivenessState, LivenessStatus, PeerId,
    PeerRecord, RankedCandidate, SelectionPolicy, PEER_METADATA_PREFIX,
};
use crate::ports::{PeerDirectoryApi, ProbeTransport, RegistryStore, TimeSource};

/// Default probe fan-out per refresh.
pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 32;

/// Refresh tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryConfig {
    /// Deadline for a single probe.
    pub probe_timeout: Duration,
    /// Probes in flight at once.
    pub max_concurrent_probes: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
        }
    }
}

/// Registry-backed view of which peers are alive right now.
///
/// Each [`refresh`](Self::refresh) scans the registry, probes every distinct
/// peer and replaces the snapshot in one step. Readers always see a complete
/// snapshot from a single refresh.
pub struct PeerDirectory {
    local_id: PeerId,
    registry: Arc<dyn RegistryStore>,
    prober: LivenessProbe,
    time_source: Arc<dyn TimeSource>,
    max_concurrent_probes: usize,
    snapshot: RwLock<Arc<DirectorySnapshot>>,
}

impl PeerDirectory {
    /// Create a directory for the node `local_id`.
    ///
    /// The directory owns a fresh `LivenessState`.
    pub fn new(
        local_id: PeerId,
        registry: Arc<dyn RegistryStore>,
        transport: Arc<dyn ProbeTransport>,
        time_source: Arc<dyn TimeSource>,
        config: DirectoryConfig,
    ) -> Self {
        let prober = LivenessProbe::new(transport, LivenessState::new(), Arc::clone(&time_source))
            .with_timeout(config.probe_timeout);

        Self {
            local_id,
            registry,
            prober,
            time_source,
            max_concurrent_probes: config.max_concurrent_probes.max(1),
            snapshot: RwLock::new(Arc::new(DirectorySnapshot::empty())),
        }
    }

    /// Id of the node this directory serves.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Handle to the liveness map.
    pub fn liveness_state(&self) -> &LivenessState {
        self.prober.state()
    }

    /// Scan, probe and swap in a new snapshot.
    pub async fn refresh(&self) -> Result<Arc<DirectorySnapshot>, DirectoryError> {
        let _timer = HistogramTimer::new(&REFRESH_DURATION);

        let candidates = self.collect_candidates().await?;
        let known: HashSet<PeerId> = candidates.keys().cloned().collect();
        let probed = candidates.len();

        let live: Vec<PeerRecord> = stream::iter(candidates.into_values())
            .map(|record| async move {
                let status = self.prober.probe(&record.id).await;
                (status == LivenessStatus::Active).then_some(record)
            })
            .buffer_unordered(self.max_concurrent_probes)
            .filter_map(future::ready)
            .collect()
            .await;

        let pruned = self.prober.state().retain(&known);
        if pruned > 0 {
            debug!(pruned, "Dropped liveness entries for peers gone from the registry");
        }

        let snapshot = Arc::new(DirectorySnapshot::new(live, self.time_source.now()));
        *self.snapshot.write() = Arc::clone(&snapshot);
        LIVE_PEERS.set(snapshot.len() as f64);

        info!(probed, live = snapshot.len(), "Directory refreshed");
        Ok(snapshot)
    }

    /// Decode every registry entry into one candidate per peer id.
    async fn collect_candidates(&self) -> Result<BTreeMap<PeerId, PeerRecord>, DirectoryError> {
        let mut scan = self.registry.scan(PEER_METADATA_PREFIX.as_bytes()).await?;
        let mut candidates = BTreeMap::new();

        while let Some(entry) = scan.next().await {
            let (key, value) = entry?;

            let record = match PeerRecord::decode_entry(&key, &value) {
                Ok(record) => record,
                Err(err) => {
                    metric_inc!(MALFORMED_RECORDS);
                    warn!(
                        key = %String::from_utf8_lossy(&key),
                        error = %err,
                        "Skipping malformed registry entry"
                    );
                    continue;
                }
            };

            if record.id == self.local_id {
                continue;
            }

            match candidates.entry(record.id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(mut slot) => {
                    if record.updated_at > slot.get().updated_at {
                        slot.insert(record);
                    }
                }
            }
        }

        Ok(candidates)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Latest probe result for `peer`.
    pub fn liveness(&self, peer: &PeerId) -> LivenessStatus {
        self.prober.state().status(peer)
    }

    /// Best live peer for `reference` under `policy`.
    pub fn select_best(
        &self,
        reference: &Coordinate,
        policy: &SelectionPolicy,
    ) -> Option<RankedCandidate> {
        let snapshot = self.snapshot();
        let best = policy.select_best(snapshot.records(), reference);
        let outcome = if best.is_some() { "selected" } else { "none" };
        metric_inc!(SELECTION_RESULTS, &[outcome]);
        best
    }
}

#[async_trait]
impl PeerDirectoryApi for PeerDirectory {
    async fn refresh(&self) -> Result<Arc<DirectorySnapshot>, DirectoryError> {
        PeerDirectory::refresh(self).await
    }

    fn snapshot(&self) -> Arc<DirectorySnapshot> {
        PeerDirectory::snapshot(self)
    }

    fn liveness(&self, peer: &PeerId) -> LivenessStatus {
        PeerDirectory::liveness(self, peer)
    }

    fn select_best(
        &self,
        reference: &Coordinate,
        policy: &SelectionPolicy,
    ) -> Option<RankedCandidate> {
        PeerDirectory::select_best(self, reference, policy)
    }
}
