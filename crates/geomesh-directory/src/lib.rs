//! # GeoMesh Peer Directory
//!
//! Quality-aware peer directory for a mesh of miners.
//!
//! Every node periodically publishes a small record about itself (location,
//! bandwidth, latency) under `/peer/metadata/<id>` in a shared key/value
//! registry. Any node can then scan the registry, probe each advertised peer
//! for liveness and pick the best live peer for a reference location.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture with:
//! - **Domain Layer:** haversine distance, peer records, liveness state,
//!   snapshots and the selection policy
//! - **Ports Layer:** registry, probe, session, telemetry and time traits
//! - **Service Layer:** `LivenessProbe`, `PeerDirectory`, `StatusPublisher`
//! - **Adapters Layer:** in-memory and directory registries, TCP overlay,
//!   simulated and system telemetry (feature-gated)
//!
//! ## Features
//!
//! - `network` - TCP overlay, directory-backed registry, TCP latency probe
//! - `system-telemetry` - HTTP geolocation and bandwidth sources
//! - `test-utils` - deterministic port implementations for tests
//!
//! ## Example
//!
//! ```rust
//! use geomesh_directory::{Coordinate, PeerId, PeerRecord, Location, SelectionPolicy, Timestamp};
//!
//! let here = Coordinate::new(37.7749, -122.4194).unwrap();
//! let oakland = PeerRecord::new(PeerId::from("miner-1"), Timestamp::new(1000))
//!     .with_location(Location::at(Coordinate::new(37.8044, -122.2712).unwrap()))
//!     .with_latency(12.0);
//! let new_york = PeerRecord::new(PeerId::from("miner-2"), Timestamp::new(1000))
//!     .with_location(Location::at(Coordinate::new(40.7128, -74.0060).unwrap()));
//!
//! let best = SelectionPolicy::default()
//!     .select_best(&[oakland, new_york], &here)
//!     .unwrap();
//! assert_eq!(best.peer_id().as_str(), "miner-1");
//! ```

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod domain;
pub mod ports;
pub mod service;

/// Adapters for registries, overlay transport and telemetry sources.
/// Network-facing adapters require the `network` feature.
pub mod adapters;

/// Test utilities (FixedTimeSource, scripted transports, failing registry)
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// =============================================================================
// CORE RE-EXPORTS
// =============================================================================

// Domain
pub use domain::{
    distance_km, record_key, Bandwidth, Coordinate, CoordinateError, DirectoryError,
    DirectorySnapshot, LivenessEntry, LivenessState, LivenessStatus, Location, PeerId,
    PeerRecord, PublishError, RankedCandidate, RecordError, RegistryError, SelectionPolicy,
    TelemetryError, Timestamp, TransportError, DEFAULT_MAX_DISTANCE_KM, PEER_METADATA_PREFIX,
};

// Port traits
pub use ports::{
    BandwidthSource, ChatHandler, DiscoveryListener, GeolocationSource, LatencySource,
    PeerDirectoryApi, PeerDiscovered, ProbeTransport, RegistryStore, SessionSink,
    SessionTransport, TimeSource,
};

// Services
pub use service::{
    DirectoryConfig, LivenessProbe, PeerDirectory, PublisherState, StatusPublisher,
    TelemetrySources,
};

// Adapters
pub use adapters::{InMemoryRegistry, LoggingChatHandler, SimulatedTelemetry, SystemTimeSource};

#[cfg(feature = "network")]
pub use adapters::{AddressBook, DirectoryRegistry, OverlayListener, TcpLatencyProbe, TcpOverlay};

#[cfg(feature = "system-telemetry")]
pub use adapters::{HttpBandwidthProbe, IpInfoGeolocation};

// =============================================================================
// TEST UTILITIES (Requires `test-utils` feature)
// =============================================================================

#[cfg(feature = "test-utils")]
pub use test_utils::FixedTimeSource;
