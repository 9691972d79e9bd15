//! # Peer Records
//!
//! The metadata a node publishes about itself, and its registry encoding.
//!
//! ## Keyspace
//!
//! One key per peer: `/peer/metadata/<id>`. Every record is discoverable by
//! scanning [`PEER_METADATA_PREFIX`].
//!
//! ## Wire Format
//!
//! UTF-8 JSON with the keys `id`, `location`, `bandwidth`, `latency`,
//! `updatedAt`. Absent measurements are encoded as `null`:
//!
//! ```json
//! {
//!   "id": "miner-4711",
//!   "location": {"city": "Berlin", "region": "Berlin", "country": "DE",
//!                "latitude": 52.52, "longitude": 13.405},
//!   "bandwidth": {"downMbps": 87.0, "upMbps": 21.5},
//!   "latency": 14.2,
//!   "updatedAt": 1760870400
//! }
//! ```

use serde::{Deserialize, Serialize};

use super::errors::RecordError;
use super::geo::Coordinate;
use super::value_objects::{PeerId, Timestamp};

/// Prefix shared by every peer metadata key.
pub const PEER_METADATA_PREFIX: &str = "/peer/metadata/";

/// Registry key for a peer's record.
pub fn record_key(id: &PeerId) -> Vec<u8> {
    format!("{PEER_METADATA_PREFIX}{id}").into_bytes()
}

/// Recover the peer id from a registry key.
pub fn peer_id_from_key(key: &[u8]) -> Result<PeerId, RecordError> {
    let key_str = String::from_utf8_lossy(key);
    match key_str.strip_prefix(PEER_METADATA_PREFIX) {
        Some(id) if !id.is_empty() => Ok(PeerId::new(id)),
        _ => Err(RecordError::ForeignKey(key_str.into_owned())),
    }
}

/// Geolocation of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// Validated coordinate.
    pub coordinate: Coordinate,
    /// City name, empty when unknown.
    pub city: String,
    /// Region or state, empty when unknown.
    pub region: String,
    /// Country code or name, empty when unknown.
    pub country: String,
}

impl Location {
    /// Location with a coordinate and no place names.
    pub fn at(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            city: String::new(),
            region: String::new(),
            country: String::new(),
        }
    }

    /// Attach place names.
    pub fn with_place(
        mut self,
        city: impl Into<String>,
        region: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        self.city = city.into();
        self.region = region.into();
        self.country = country.into();
        self
    }
}

/// Measured link capacity in megabits per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bandwidth {
    /// Downstream capacity.
    pub down_mbps: f64,
    /// Upstream capacity, if measured.
    pub up_mbps: Option<f64>,
}

impl Bandwidth {
    /// Validated bandwidth: values must be finite and non-negative.
    pub fn new(down_mbps: f64, up_mbps: Option<f64>) -> Result<Self, RecordError> {
        check_metric("bandwidth.downMbps", down_mbps)?;
        if let Some(up) = up_mbps {
            check_metric("bandwidth.upMbps", up)?;
        }
        Ok(Self { down_mbps, up_mbps })
    }

    /// `down + up`, or down alone when upstream is unknown.
    pub fn total_mbps(&self) -> f64 {
        self.down_mbps + self.up_mbps.unwrap_or(0.0)
    }
}

/// Metadata a node publishes about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    /// Publishing node.
    pub id: PeerId,
    /// Where the node is, if geolocation succeeded.
    pub location: Option<Location>,
    /// Link capacity, if measured.
    pub bandwidth: Option<Bandwidth>,
    /// Round-trip latency in milliseconds, if measured.
    pub latency_ms: Option<f64>,
    /// When the node last published.
    pub updated_at: Timestamp,
}

impl PeerRecord {
    /// A record with no measurements.
    pub fn new(id: PeerId, updated_at: Timestamp) -> Self {
        Self {
            id,
            location: None,
            bandwidth: None,
            latency_ms: None,
            updated_at,
        }
    }

    /// Set the location.
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the bandwidth.
    pub fn with_bandwidth(mut self, bandwidth: Bandwidth) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }

    /// Set the latency.
    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Coordinate of this record, if located.
    pub fn coordinate(&self) -> Option<&Coordinate> {
        self.location.as_ref().map(|l| &l.coordinate)
    }

    /// Total bandwidth used for ranking.
    pub fn bandwidth_total(&self) -> Option<f64> {
        self.bandwidth.map(|b| b.total_mbps())
    }

    /// Registry key this record is stored under.
    pub fn registry_key(&self) -> Vec<u8> {
        record_key(&self.id)
    }

    /// Encode as registry JSON.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&WireRecord::from(self))
    }

    /// Decode and validate a registry value.
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        let wire: WireRecord = serde_json::from_slice(bytes)?;
        wire.try_into()
    }

    /// Decode a `(key, value)` pair from a registry scan.
    ///
    /// The id inside the value must match the id in the key.
    pub fn decode_entry(key: &[u8], value: &[u8]) -> Result<Self, RecordError> {
        let key_id = peer_id_from_key(key)?;
        let record = Self::decode(value)?;
        if record.id != key_id {
            return Err(RecordError::KeyMismatch {
                key: String::from_utf8_lossy(key).into_owned(),
                record_id: record.id.to_string(),
            });
        }
        Ok(record)
    }
}

fn check_metric(field: &'static str, value: f64) -> Result<(), RecordError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(RecordError::InvalidMetric { field, value })
    }
}

// =============================================================================
// WIRE REPRESENTATION
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    id: String,
    #[serde(default)]
    location: Option<WireLocation>,
    #[serde(default)]
    bandwidth: Option<WireBandwidth>,
    #[serde(default)]
    latency: Option<f64>,
    updated_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireLocation {
    #[serde(default)]
    city: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    country: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBandwidth {
    down_mbps: f64,
    #[serde(default)]
    up_mbps: Option<f64>,
}

impl From<&PeerRecord> for WireRecord {
    fn from(record: &PeerRecord) -> Self {
        Self {
            id: record.id.to_string(),
            location: record.location.as_ref().map(|l| WireLocation {
                city: l.city.clone(),
                region: l.region.clone(),
                country: l.country.clone(),
                latitude: l.coordinate.latitude(),
                longitude: l.coordinate.longitude(),
            }),
            bandwidth: record.bandwidth.map(|b| WireBandwidth {
                down_mbps: b.down_mbps,
                up_mbps: b.up_mbps,
            }),
            latency: record.latency_ms,
            updated_at: record.updated_at.as_secs(),
        }
    }
}

impl TryFrom<WireRecord> for PeerRecord {
    type Error = RecordError;

    fn try_from(wire: WireRecord) -> Result<Self, Self::Error> {
        if wire.id.is_empty() {
            return Err(RecordError::EmptyId);
        }

        let location = match wire.location {
            Some(l) => Some(Location {
                coordinate: Coordinate::new(l.latitude, l.longitude)?,
                city: l.city,
                region: l.region,
                country: l.country,
            }),
            None => None,
        };

        let bandwidth = match wire.bandwidth {
            Some(b) => Some(Bandwidth::new(b.down_mbps, b.up_mbps)?),
            None => None,
        };

        if let Some(latency) = wire.latency {
            check_metric("latency", latency)?;
        }

        Ok(Self {
            id: PeerId::new(wire.id),
            location,
            bandwidth,
            latency_ms: wire.latency,
            updated_at: Timestamp::new(wire.updated_at),
        })
    }
}
