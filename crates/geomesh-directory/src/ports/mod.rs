//! # Ports Layer - Hexagonal Architecture Boundaries
//!
//! - **Driving Ports (Inbound):** what the node runtime calls
//! - **Driven Ports (Outbound):** what adapters must provide

pub mod inbound;
pub mod outbound;

pub use inbound::{ChatHandler, PeerDirectoryApi};
pub use outbound::{
    BandwidthSource, DiscoveryListener, GeolocationSource, LatencySource, PeerDiscovered,
    ProbeTransport, RegistryEntry, RegistryScan, RegistryStore, SessionSink, SessionTransport,
    TimeSource,
};
