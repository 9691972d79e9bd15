//! Live peer snapshot produced by one directory refresh.

use std::collections::BTreeMap;

use super::record::PeerRecord;
use super::value_objects::{PeerId, Timestamp};

/// Records of peers found active by a single refresh, keyed by id.
///
/// Immutable once built; the directory replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectorySnapshot {
    peers: BTreeMap<PeerId, PeerRecord>,
    taken_at: Timestamp,
}

impl DirectorySnapshot {
    /// Build a snapshot from live records.
    pub fn new(records: impl IntoIterator<Item = PeerRecord>, taken_at: Timestamp) -> Self {
        let peers = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self { peers, taken_at }
    }

    /// Snapshot with no peers, used before the first refresh.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Record of a live peer.
    pub fn get(&self, peer: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(peer)
    }

    /// True if `peer` was live at refresh time.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    /// Live records in id order.
    pub fn records(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Live peer ids in order.
    pub fn peer_ids(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.keys()
    }

    /// When the producing refresh completed.
    pub fn taken_at(&self) -> Timestamp {
        self.taken_at
    }

    /// Number of live peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True if no peer was live.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_keyed_by_id() {
        let snapshot = DirectorySnapshot::new(
            vec![
                PeerRecord::new(PeerId::from("b"), Timestamp::new(1)),
                PeerRecord::new(PeerId::from("a"), Timestamp::new(1)),
            ],
            Timestamp::new(5),
        );

        let ids: Vec<&str> = snapshot.peer_ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(snapshot.contains(&PeerId::from("a")));
        assert_eq!(snapshot.taken_at(), Timestamp::new(5));
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = DirectorySnapshot::empty();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.records().count(), 0);
    }
}
