//! # Driven Ports (Outbound SPI)
//!
//! Interfaces the directory **requires** from its host: the shared registry,
//! the overlay transport, local telemetry sources and a clock.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::net::SocketAddr;

use crate::domain::{
    Bandwidth, Location, PeerId, RegistryError, TelemetryError, Timestamp, TransportError,
};

/// A raw `(key, value)` pair from a registry scan.
pub type RegistryEntry = (Vec<u8>, Vec<u8>);

/// Lazily consumed scan result.
///
/// Finite and not restartable: once drained, issue a new `scan`.
pub type RegistryScan = BoxStream<'static, Result<RegistryEntry, RegistryError>>;

/// Shared key/value registry holding every node's published record.
///
/// Eventually consistent, no cross-key transactions. A write by one node
/// becomes visible to the others at some later point.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    ///
    /// Fails with `StoreUnavailable` on network or timeout errors.
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), RegistryError>;

    /// Fetch the value stored under `key`.
    ///
    /// Fails with `NotFound` if nothing is stored there.
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>, RegistryError>;

    /// Every entry whose key starts with `prefix`.
    async fn scan(&self, prefix: &[u8]) -> Result<RegistryScan, RegistryError>;
}

/// Request/response reachability check against a peer.
///
/// Implementations do not need their own deadline; the prober wraps every
/// call in a timeout.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Complete one ping exchange with `peer`.
    async fn ping(&self, peer: &PeerId) -> Result<(), TransportError>;
}

/// Opens byte-stream sessions to peers.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Open a session to `peer`.
    ///
    /// Fails with `Unreachable` if no address is known or none answers.
    async fn open_session(&self, peer: &PeerId) -> Result<Box<dyn SessionSink>, TransportError>;
}

/// Write half of an established session.
#[async_trait]
pub trait SessionSink: Send {
    /// Send one message.
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Peer at the other end.
    fn peer_id(&self) -> &PeerId;
}

/// Announcement that a peer can be reached at the given addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDiscovered {
    /// The announced peer.
    pub peer_id: PeerId,
    /// Addresses to try, in preference order.
    pub known_addresses: Vec<SocketAddr>,
}

/// Receives peer discovery notifications from the overlay.
pub trait DiscoveryListener: Send + Sync {
    /// Handle one notification.
    fn on_peer_discovered(&self, event: PeerDiscovered);
}

/// Where this node is.
#[async_trait]
pub trait GeolocationSource: Send + Sync {
    /// Current location of this node.
    async fn locate(&self) -> Result<Location, TelemetryError>;
}

/// How fast this node's link is.
#[async_trait]
pub trait BandwidthSource: Send + Sync {
    /// Measure link capacity.
    async fn measure_bandwidth(&self) -> Result<Bandwidth, TelemetryError>;
}

/// How far this node is from the network, in round-trip milliseconds.
#[async_trait]
pub trait LatencySource: Send + Sync {
    /// Measure round-trip latency.
    async fn measure_latency(&self) -> Result<f64, TelemetryError>;
}

/// Abstract interface for time-related operations.
///
/// Enables deterministic testing by injecting controllable time sources.
/// Production implementations use system time; tests use fixed timestamps.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp.
    fn now(&self) -> Timestamp;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test-only TimeSource returning a fixed timestamp for deterministic assertions.
    struct FixedTimeSource(u64);

    impl TimeSource for FixedTimeSource {
        fn now(&self) -> Timestamp {
            Timestamp::new(self.0)
        }
    }

    #[test]
    fn test_fixed_time_source_returns_configured_value() {
        let source = FixedTimeSource(1000);
        assert_eq!(source.now().as_secs(), 1000);
    }

    #[test]
    fn test_ports_are_object_safe() {
        fn _registry(_: &dyn RegistryStore) {}
        fn _probe(_: &dyn ProbeTransport) {}
        fn _session(_: &dyn SessionTransport) {}
        fn _sink(_: &dyn SessionSink) {}
        fn _discovery(_: &dyn DiscoveryListener) {}
        fn _geo(_: &dyn GeolocationSource) {}
        fn _bandwidth(_: &dyn BandwidthSource) {}
        fn _latency(_: &dyn LatencySource) {}
    }
}
