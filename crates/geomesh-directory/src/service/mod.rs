//! # Directory Services
//!
//! Application services wiring the domain to the ports:
//!
//! - [`LivenessProbe`]: one bounded ping per peer, recorded in `LivenessState`
//! - [`PeerDirectory`]: scan, decode, probe, snapshot
//! - [`StatusPublisher`]: gather local telemetry, publish this node's record

mod directory;
mod prober;
mod publisher;

pub use directory::{DirectoryConfig, PeerDirectory, DEFAULT_MAX_CONCURRENT_PROBES};
pub use prober::{LivenessProbe, DEFAULT_PROBE_TIMEOUT};
pub use publisher::{
    PublisherState, StatusPublisher, TelemetrySources, DEFAULT_PUBLISH_INTERVAL,
};
