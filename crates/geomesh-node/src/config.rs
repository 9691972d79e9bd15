//! # Node Configuration
//!
//! One TOML file, overridden by `GM_*` environment variables, overridden by
//! command-line flags.
//!
//! ```toml
//! [node]
//! id = "miner-42"
//! listen_addr = "0.0.0.0:15002"
//! relay_enabled = true
//! telemetry_source = "simulated"
//!
//! [publisher]
//! interval_secs = 30
//!
//! [directory]
//! refresh_interval_secs = 30
//! probe_timeout_secs = 5
//! max_concurrent_probes = 32
//!
//! [selection]
//! max_distance_km = 1000.0
//! reference = { latitude = 37.7749, longitude = -122.4194 }
//!
//! [registry]
//! backend = "directory"
//! path = "/var/lib/geomesh/registry"
//!
//! [telemetry]
//! location = { latitude = 37.7749, longitude = -122.4194, city = "San Francisco" }
//!
//! [[peers]]
//! id = "miner-1"
//! address = "10.0.0.5:15002"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;

use geomesh_directory::adapters::telemetry::{
    DEFAULT_BANDWIDTH_URL, DEFAULT_GEOLOCATION_URL, DEFAULT_LATENCY_TARGET,
};
use geomesh_directory::{
    Coordinate, CoordinateError, DirectoryConfig, Location, PeerDiscovered, PeerId,
    SelectionPolicy, DEFAULT_MAX_DISTANCE_KM,
};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path of the file that failed to load.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {var}")]
    Env {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },

    /// A duration or count that must be positive is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Selection radius is not a positive finite number.
    #[error("selection.max_distance_km must be positive, got {0}")]
    MaxDistance(f64),

    /// A configured coordinate is out of range.
    #[error("invalid coordinate in {field}: {source}")]
    Coordinate {
        /// Config field holding the coordinate.
        field: &'static str,
        /// Range violation.
        #[source]
        source: CoordinateError,
    },

    /// Directory registry selected without a path.
    #[error("registry.backend = \"directory\" requires registry.path")]
    MissingRegistryPath,
}

/// Which telemetry sources a node uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySourceKind {
    /// Configured location, random bandwidth and latency.
    #[default]
    Simulated,
    /// Real measurements over the network.
    System,
}

/// Which registry backend a node uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// Process-local map. Only useful for a single node.
    #[default]
    Memory,
    /// Shared directory, one file per record.
    Directory,
}

/// Complete node configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Identity and listener.
    pub node: NodeSection,
    /// Status publishing.
    pub publisher: PublisherSection,
    /// Directory refresh.
    pub directory: DirectorySection,
    /// Peer selection.
    pub selection: SelectionSection,
    /// Registry backend.
    pub registry: RegistrySection,
    /// Telemetry sources.
    pub telemetry: TelemetrySection,
    /// Bootstrap peers announced to the overlay at start-up.
    pub peers: Vec<BootstrapPeer>,
}

/// `[node]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSection {
    /// Node id. A random `miner-<n>` id is picked when unset.
    pub id: Option<String>,
    /// Overlay listener address.
    pub listen_addr: SocketAddr,
    /// Advertise as a relay.
    pub relay_enabled: bool,
    /// Telemetry source family.
    pub telemetry_source: TelemetrySourceKind,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: None,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 15002)),
            relay_enabled: false,
            telemetry_source: TelemetrySourceKind::default(),
        }
    }
}

/// `[publisher]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublisherSection {
    /// Seconds between two publishes.
    pub interval_secs: u64,
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

/// `[directory]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectorySection {
    /// Seconds between two refreshes.
    pub refresh_interval_secs: u64,
    /// Deadline for one liveness probe.
    pub probe_timeout_secs: u64,
    /// Probes in flight at once.
    pub max_concurrent_probes: usize,
}

impl Default for DirectorySection {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30,
            probe_timeout_secs: 5,
            max_concurrent_probes: 32,
        }
    }
}

/// A plain latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinateConfig {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
}

impl CoordinateConfig {
    fn resolve(&self, field: &'static str) -> Result<Coordinate, ConfigError> {
        Coordinate::new(self.latitude, self.longitude)
            .map_err(|source| ConfigError::Coordinate { field, source })
    }
}

/// `[selection]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionSection {
    /// Eligibility radius.
    pub max_distance_km: f64,
    /// Location peers are ranked against. Falls back to the simulated
    /// location when unset.
    pub reference: Option<CoordinateConfig>,
}

impl Default for SelectionSection {
    fn default() -> Self {
        Self {
            max_distance_km: DEFAULT_MAX_DISTANCE_KM,
            reference: None,
        }
    }
}

/// `[registry]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySection {
    /// Backend kind.
    pub backend: RegistryBackend,
    /// Shared directory for the `directory` backend.
    pub path: Option<PathBuf>,
}

/// Location reported by the simulated source.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationConfig {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// City name.
    #[serde(default)]
    pub city: String,
    /// Region or state.
    #[serde(default)]
    pub region: String,
    /// Country.
    #[serde(default)]
    pub country: String,
}

/// `[telemetry]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySection {
    /// Simulated location. Without it the simulated node is unlocated.
    pub location: Option<LocationConfig>,
    /// ipinfo-style endpoint for the system source.
    pub geolocation_url: String,
    /// Download endpoint for the system bandwidth probe.
    pub bandwidth_url: String,
    /// `host:port` for the system latency probe.
    pub latency_target: String,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            location: None,
            geolocation_url: DEFAULT_GEOLOCATION_URL.to_string(),
            bandwidth_url: DEFAULT_BANDWIDTH_URL.to_string(),
            latency_target: DEFAULT_LATENCY_TARGET.to_string(),
        }
    }
}

/// `[[peers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapPeer {
    /// Peer id.
    pub id: String,
    /// Overlay address.
    pub address: SocketAddr,
}

impl BootstrapPeer {
    /// Discovery notification announcing this peer.
    pub fn to_discovery(&self) -> PeerDiscovered {
        PeerDiscovered {
            peer_id: PeerId::from(self.id.as_str()),
            known_addresses: vec![self.address],
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `GM_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `GM_*` overrides using a custom lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("GM_NODE_ID") {
            self.node.id = Some(id);
        }

        if let Some(value) = lookup("GM_LISTEN_ADDR") {
            self.node.listen_addr = value.parse().map_err(|_| ConfigError::Env {
                var: "GM_LISTEN_ADDR",
                value: value.clone(),
            })?;
        }

        if let Some(value) = lookup("GM_TELEMETRY_SOURCE") {
            self.node.telemetry_source =
                TelemetrySourceKind::from_str(&value, true).map_err(|_| ConfigError::Env {
                    var: "GM_TELEMETRY_SOURCE",
                    value: value.clone(),
                })?;
        }

        if let Some(dir) = lookup("GM_REGISTRY_DIR") {
            self.registry.backend = RegistryBackend::Directory;
            self.registry.path = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Check every value the runtime relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.publisher.interval_secs == 0 {
            return Err(ConfigError::Zero("publisher.interval_secs"));
        }
        if self.directory.refresh_interval_secs == 0 {
            return Err(ConfigError::Zero("directory.refresh_interval_secs"));
        }
        if self.directory.probe_timeout_secs == 0 {
            return Err(ConfigError::Zero("directory.probe_timeout_secs"));
        }
        if self.directory.max_concurrent_probes == 0 {
            return Err(ConfigError::Zero("directory.max_concurrent_probes"));
        }

        let radius = self.selection.max_distance_km;
        if !radius.is_finite() || radius <= 0.0 {
            return Err(ConfigError::MaxDistance(radius));
        }

        self.reference()?;
        self.simulated_location()?;

        if self.registry.backend == RegistryBackend::Directory && self.registry.path.is_none() {
            return Err(ConfigError::MissingRegistryPath);
        }

        Ok(())
    }

    /// Configured node id, or a fresh random `miner-<n>`.
    pub fn node_id(&self) -> PeerId {
        self.node
            .id
            .as_deref()
            .map(PeerId::from)
            .unwrap_or_else(PeerId::random_miner)
    }

    /// Publish interval.
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publisher.interval_secs)
    }

    /// Refresh interval.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.directory.refresh_interval_secs)
    }

    /// Refresh tuning for `PeerDirectory`.
    pub fn directory_config(&self) -> DirectoryConfig {
        DirectoryConfig {
            probe_timeout: Duration::from_secs(self.directory.probe_timeout_secs),
            max_concurrent_probes: self.directory.max_concurrent_probes,
        }
    }

    /// Selection policy.
    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy::new(self.selection.max_distance_km)
    }

    /// Simulated location, if configured.
    pub fn simulated_location(&self) -> Result<Option<Location>, ConfigError> {
        self.telemetry
            .location
            .as_ref()
            .map(|loc| {
                let coordinate = CoordinateConfig {
                    latitude: loc.latitude,
                    longitude: loc.longitude,
                }
                .resolve("telemetry.location")?;
                Ok(Location::at(coordinate).with_place(
                    loc.city.clone(),
                    loc.region.clone(),
                    loc.country.clone(),
                ))
            })
            .transpose()
    }

    /// Reference location for selection.
    ///
    /// `selection.reference` wins; otherwise the simulated location is used.
    pub fn reference(&self) -> Result<Option<Coordinate>, ConfigError> {
        if let Some(reference) = &self.selection.reference {
            return reference.resolve("selection.reference").map(Some);
        }
        Ok(self.simulated_location()?.map(|location| location.coordinate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const FULL: &str = r#"
        [node]
        id = "miner-42"
        listen_addr = "127.0.0.1:16000"
        relay_enabled = true
        telemetry_source = "system"

        [publisher]
        interval_secs = 10

        [directory]
        refresh_interval_secs = 15
        probe_timeout_secs = 2
        max_concurrent_probes = 8

        [selection]
        max_distance_km = 600.0
        reference = { latitude = 37.7749, longitude = -122.4194 }

        [registry]
        backend = "directory"
        path = "/tmp/geomesh"

        [telemetry]
        location = { latitude = 52.52, longitude = 13.405, city = "Berlin" }
        latency_target = "1.1.1.1:53"

        [[peers]]
        id = "miner-1"
        address = "10.0.0.5:15002"

        [[peers]]
        id = "miner-2"
        address = "10.0.0.6:15002"
    "#;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.publish_interval(), Duration::from_secs(30));
        assert_eq!(config.directory_config(), DirectoryConfig::default());
        assert_eq!(config.selection_policy(), SelectionPolicy::default());
        assert_eq!(config.node.telemetry_source, TelemetrySourceKind::Simulated);
        assert_eq!(config.registry.backend, RegistryBackend::Memory);
        assert_eq!(config.reference().unwrap(), None);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = NodeConfig::parse("").unwrap();
        assert_eq!(config.node.listen_addr, NodeSection::default().listen_addr);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn test_parse_full_file() {
        let config = NodeConfig::parse(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.node_id(), PeerId::from("miner-42"));
        assert_eq!(config.node.listen_addr, "127.0.0.1:16000".parse::<SocketAddr>().unwrap());
        assert!(config.node.relay_enabled);
        assert_eq!(config.node.telemetry_source, TelemetrySourceKind::System);
        assert_eq!(config.refresh_interval(), Duration::from_secs(15));
        assert_eq!(config.directory_config().max_concurrent_probes, 8);
        assert_eq!(config.selection_policy().max_distance_km, 600.0);
        assert_eq!(config.registry.path, Some(PathBuf::from("/tmp/geomesh")));
        assert_eq!(config.telemetry.latency_target, "1.1.1.1:53");
        assert_eq!(config.telemetry.geolocation_url, DEFAULT_GEOLOCATION_URL);
        assert_eq!(config.peers.len(), 2);

        let announced = config.peers[0].to_discovery();
        assert_eq!(announced.peer_id, PeerId::from("miner-1"));
        assert_eq!(announced.known_addresses, vec!["10.0.0.5:15002".parse::<SocketAddr>().unwrap()]);

        // Explicit reference wins over the simulated location.
        let reference = config.reference().unwrap().unwrap();
        assert_eq!(reference.latitude(), 37.7749);
        assert_eq!(config.simulated_location().unwrap().unwrap().city, "Berlin");
    }

    #[test]
    fn test_reference_falls_back_to_simulated_location() {
        let config = NodeConfig::parse(
            r#"
            [telemetry]
            location = { latitude = 52.52, longitude = 13.405 }
            "#,
        )
        .unwrap();
        assert_eq!(config.reference().unwrap().unwrap().latitude(), 52.52);
    }

    #[test]
    fn test_random_id_when_unset() {
        let id = NodeConfig::default().node_id();
        assert!(id.as_str().starts_with("miner-"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(matches!(
            NodeConfig::parse("[node]\nlisten = \"0.0.0.0:1\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_bad_socket_address_is_rejected() {
        assert!(NodeConfig::parse("[[peers]]\nid = \"a\"\naddress = \"nowhere\"").is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = NodeConfig::default();
        config.publisher.interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Zero("publisher.interval_secs"))));

        let mut config = NodeConfig::default();
        config.directory.max_concurrent_probes = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero("directory.max_concurrent_probes"))
        ));

        let mut config = NodeConfig::default();
        config.selection.max_distance_km = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::MaxDistance(_))));

        let mut config = NodeConfig::default();
        config.selection.reference = Some(CoordinateConfig {
            latitude: 120.0,
            longitude: 0.0,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Coordinate {
                field: "selection.reference",
                ..
            })
        ));

        let mut config = NodeConfig::default();
        config.registry.backend = RegistryBackend::Directory;
        assert!(matches!(config.validate(), Err(ConfigError::MissingRegistryPath)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = NodeConfig::parse(FULL).unwrap();
        config
            .apply_env_from(env(&[
                ("GM_NODE_ID", "miner-7"),
                ("GM_LISTEN_ADDR", "0.0.0.0:17000"),
                ("GM_TELEMETRY_SOURCE", "Simulated"),
                ("GM_REGISTRY_DIR", "/srv/registry"),
            ]))
            .unwrap();

        assert_eq!(config.node_id(), PeerId::from("miner-7"));
        assert_eq!(config.node.listen_addr.port(), 17000);
        assert_eq!(config.node.telemetry_source, TelemetrySourceKind::Simulated);
        assert_eq!(config.registry.backend, RegistryBackend::Directory);
        assert_eq!(config.registry.path, Some(PathBuf::from("/srv/registry")));
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = NodeConfig::default();
        let result = config.apply_env_from(env(&[("GM_TELEMETRY_SOURCE", "satellite")]));
        assert!(matches!(
            result,
            Err(ConfigError::Env {
                var: "GM_TELEMETRY_SOURCE",
                ..
            })
        ));

        let result = config.apply_env_from(env(&[("GM_LISTEN_ADDR", "localhost")]));
        assert!(matches!(result, Err(ConfigError::Env { var: "GM_LISTEN_ADDR", .. })));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            NodeConfig::load("/definitely/not/here.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
