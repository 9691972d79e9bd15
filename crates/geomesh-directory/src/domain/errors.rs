//! Domain Errors for the Peer Directory
//!
//! Failures are split by where they are handled:
//!
//! | Error              | Raised by           | Handling                                 |
//! |--------------------|---------------------|------------------------------------------|
//! | `RegistryError`    | `RegistryStore`     | logged, retried on the next natural tick |
//! | `RecordError`      | record decoding     | entry skipped, batch continues           |
//! | `TransportError`   | `ProbeTransport`    | classified as `Inactive`, never surfaced |
//! | `TelemetryError`   | telemetry sources   | field published as absent                |

use thiserror::Error;

/// Invalid geographic coordinate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    /// Latitude outside `[-90, 90]` or not finite.
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    /// Longitude outside `[-180, 180]` or not finite.
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
}

/// Errors from the shared registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Registry unreachable or the operation timed out.
    #[error("registry unavailable: {reason}")]
    StoreUnavailable {
        /// Underlying cause.
        reason: String,
    },

    /// No value stored under the requested key.
    #[error("no registry entry for key {key}")]
    NotFound {
        /// Key as lossy UTF-8.
        key: String,
    },
}

impl RegistryError {
    /// Shorthand for `StoreUnavailable`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Shorthand for `NotFound`.
    pub fn not_found(key: &[u8]) -> Self {
        Self::NotFound {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }
}

/// A registry entry that could not be turned into a `PeerRecord`.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Value is not valid JSON for a record.
    #[error("malformed record JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Record carried an invalid coordinate.
    #[error("invalid location: {0}")]
    Location(#[from] CoordinateError),

    /// A numeric metric was negative or not finite.
    #[error("invalid {field}: {value}")]
    InvalidMetric {
        /// Field name as published.
        field: &'static str,
        /// Offending value.
        value: f64,
    },

    /// Record id was empty.
    #[error("record has an empty id")]
    EmptyId,

    /// Record id does not match the key it was stored under.
    #[error("record id {record_id} does not match registry key {key}")]
    KeyMismatch {
        /// Key the value was read from.
        key: String,
        /// Id inside the value.
        record_id: String,
    },

    /// Key is outside the peer metadata keyspace.
    #[error("key {0} is not a peer metadata key")]
    ForeignKey(String),
}

/// Failures of the overlay transport.
///
/// The liveness probe folds every variant into `LivenessStatus::Inactive`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No response within the allotted time.
    #[error("timed out")]
    Timeout,

    /// Remote side refused the connection.
    #[error("connection refused")]
    Refused,

    /// No known address for the peer, or no route to it.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// Remote answered with something other than the expected reply.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Any other I/O failure.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => Self::Refused,
            std::io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(err.to_string()),
        }
    }
}

/// A local telemetry source could not produce a measurement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelemetryError {
    /// Source is unavailable right now.
    #[error("{source_name} unavailable: {reason}")]
    Unavailable {
        /// Which source failed (geolocation, bandwidth, latency).
        source_name: &'static str,
        /// Underlying cause.
        reason: String,
    },
}

impl TelemetryError {
    /// Shorthand for `Unavailable`.
    pub fn unavailable(source_name: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            source_name,
            reason: reason.into(),
        }
    }
}

/// Failure of a single refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// The registry scan itself failed; the previous snapshot is kept.
    #[error("registry scan failed: {0}")]
    Scan(#[from] RegistryError),
}

/// Failure of a single publish cycle.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Record could not be encoded.
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// Registry rejected or could not receive the write.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
