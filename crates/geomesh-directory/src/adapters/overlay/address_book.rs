use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::domain::PeerId;
use crate::ports::{DiscoveryListener, PeerDiscovered};

/// Known addresses per peer, fed by discovery notifications.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    entries: Arc<RwLock<HashMap<PeerId, Vec<SocketAddr>>>>,
}

impl AddressBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses for `peer`, most recently announced first.
    pub fn addresses(&self, peer: &PeerId) -> Vec<SocketAddr> {
        self.entries.read().get(peer).cloned().unwrap_or_default()
    }

    /// Every known peer, sorted by id.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.entries.read().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Every known peer with its addresses, sorted by id.
    pub fn entries(&self) -> Vec<(PeerId, Vec<SocketAddr>)> {
        let mut entries: Vec<(PeerId, Vec<SocketAddr>)> = self
            .entries
            .read()
            .iter()
            .map(|(peer, addresses)| (peer.clone(), addresses.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Merge newly announced addresses.
    ///
    /// Announced addresses move to the front; older ones are kept behind them.
    pub fn insert(&self, peer: PeerId, addresses: &[SocketAddr]) {
        if addresses.is_empty() {
            return;
        }
        let mut entries = self.entries.write();
        let known = entries.entry(peer).or_default();
        known.retain(|a| !addresses.contains(a));

        let mut merged = Vec::with_capacity(addresses.len() + known.len());
        for addr in addresses {
            if !merged.contains(addr) {
                merged.push(*addr);
            }
        }
        merged.append(known);
        *known = merged;
    }

    /// Forget a peer.
    pub fn remove(&self, peer: &PeerId) {
        self.entries.write().remove(peer);
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if no peer is known.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DiscoveryListener for AddressBook {
    fn on_peer_discovered(&self, event: PeerDiscovered) {
        debug!(
            peer_id = %event.peer_id,
            addresses = event.known_addresses.len(),
            "Peer discovered"
        );
        self.insert(event.peer_id, &event.known_addresses);
    }
}
