//! Domain Layer - Pure logic with no I/O
//!
//! - Coordinates and great-circle distance
//! - Peer records and their registry encoding
//! - Per-peer liveness state and live snapshots
//! - Distance/latency/bandwidth selection

pub mod errors;
pub mod geo;
pub mod liveness;
pub mod record;
pub mod selection;
pub mod snapshot;
pub mod value_objects;

pub use errors::*;
pub use geo::*;
pub use liveness::*;
pub use record::*;
pub use selection::*;
pub use snapshot::*;
pub use value_objects::*;
