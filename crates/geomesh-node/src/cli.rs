use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::{ConfigError, NodeConfig, RegistryBackend, TelemetrySourceKind};

/// GeoMesh miner node
#[derive(Parser, Debug, Default)]
#[command(name = "geomesh-node")]
#[command(about = "Publishes node quality, tracks live peers and picks the best one")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Node id (default: random miner-<n>)
    #[arg(long)]
    pub node_id: Option<String>,

    /// Overlay listener address
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Telemetry source family
    #[arg(long, value_enum)]
    pub telemetry_source: Option<TelemetrySourceKind>,

    /// Shared registry directory (switches to the directory backend)
    #[arg(long)]
    pub registry_dir: Option<PathBuf>,

    /// Advertise this node as a relay
    #[arg(long)]
    pub relay: bool,

    /// Forward stdin lines to the selected peer
    #[arg(long)]
    pub chat: bool,

    /// Prometheus endpoint port (0 disables it)
    #[arg(long)]
    pub metrics_port: Option<u16>,
}

impl Cli {
    /// Resolve the final configuration: file, then environment, then flags.
    pub fn resolve(&self) -> Result<NodeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        config.apply_env()?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides.
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(id) = &self.node_id {
            config.node.id = Some(id.clone());
        }
        if let Some(addr) = self.listen {
            config.node.listen_addr = addr;
        }
        if let Some(source) = self.telemetry_source {
            config.node.telemetry_source = source;
        }
        if let Some(dir) = &self.registry_dir {
            config.registry.backend = RegistryBackend::Directory;
            config.registry.path = Some(dir.clone());
        }
        if self.relay {
            config.node.relay_enabled = true;
        }
    }
}
