//! # Liveness State
//!
//! Per-peer reachability as seen by this node. Held in process memory only:
//! created on first probe, updated on every probe, never published.
//!
//! `LivenessState` is a cheap cloneable handle. Concurrent probe completions
//! each write their own entry, so there is no ordering dependency between
//! peers.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::value_objects::{PeerId, Timestamp};

/// Reachability of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LivenessStatus {
    /// Never probed.
    #[default]
    Unknown,
    /// Answered the last probe in time.
    Active,
    /// Last probe failed or timed out.
    Inactive,
}

impl LivenessStatus {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest probe outcome for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessEntry {
    /// Result of the most recent probe.
    pub status: LivenessStatus,
    /// When that probe completed.
    pub last_checked_at: Timestamp,
    /// Failed probes in a row; reset by a success.
    pub consecutive_failures: u32,
}

/// Shared handle to the liveness map.
#[derive(Debug, Clone, Default)]
pub struct LivenessState {
    entries: Arc<RwLock<HashMap<PeerId, LivenessEntry>>>,
}

impl LivenessState {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a probe outcome and return the updated entry.
    pub fn record(&self, peer: &PeerId, status: LivenessStatus, now: Timestamp) -> LivenessEntry {
        let mut entries = self.entries.write();
        let previous_failures = entries
            .get(peer)
            .map(|e| e.consecutive_failures)
            .unwrap_or(0);

        let consecutive_failures = match status {
            LivenessStatus::Inactive => previous_failures.saturating_add(1),
            _ => 0,
        };

        let entry = LivenessEntry {
            status,
            last_checked_at: now,
            consecutive_failures,
        };
        entries.insert(peer.clone(), entry);
        entry
    }

    /// Current status, `Unknown` if the peer was never probed.
    pub fn status(&self, peer: &PeerId) -> LivenessStatus {
        self.entries
            .read()
            .get(peer)
            .map(|e| e.status)
            .unwrap_or_default()
    }

    /// Full entry for a peer.
    pub fn entry(&self, peer: &PeerId) -> Option<LivenessEntry> {
        self.entries.read().get(peer).copied()
    }

    /// Drop entries for peers outside `keep`.
    ///
    /// Returns how many entries were removed.
    pub fn retain(&self, keep: &HashSet<PeerId>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|id, _| keep.contains(id));
        before - entries.len()
    }

    /// Number of tracked peers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if no peer was ever probed.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
