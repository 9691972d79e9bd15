//! # Driving Ports (Inbound API)
//!
//! The APIs this crate exposes to the node runtime.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::{
    Coordinate, DirectoryError, DirectorySnapshot, LivenessStatus, PeerId, RankedCandidate,
    SelectionPolicy,
};

/// Primary API for querying the peer directory.
///
/// # Example
///
/// ```rust,ignore
/// use geomesh_directory::ports::PeerDirectoryApi;
///
/// async fn pick<D: PeerDirectoryApi>(directory: &D, here: &Coordinate) {
///     directory.refresh().await?;
///     if let Some(best) = directory.select_best(here, &SelectionPolicy::default()) {
///         println!("connecting to {}", best.peer_id());
///     }
/// }
/// ```
#[async_trait]
pub trait PeerDirectoryApi: Send + Sync {
    /// Scan the registry, probe every candidate and swap in a new snapshot.
    ///
    /// On a scan failure the previous snapshot stays in place.
    async fn refresh(&self) -> Result<Arc<DirectorySnapshot>, DirectoryError>;

    /// The snapshot produced by the last successful refresh.
    fn snapshot(&self) -> Arc<DirectorySnapshot>;

    /// Latest probe result for `peer`.
    fn liveness(&self, peer: &PeerId) -> LivenessStatus;

    /// Best live peer for `reference` under `policy`.
    fn select_best(
        &self,
        reference: &Coordinate,
        policy: &SelectionPolicy,
    ) -> Option<RankedCandidate>;
}

/// Receives messages arriving on inbound chat sessions.
pub trait ChatHandler: Send + Sync {
    /// Handle one message from `from`.
    fn on_message(&self, from: &PeerId, message: &str);
}
