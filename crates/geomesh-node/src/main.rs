//! # GeoMesh Node
//!
//! Miner executable: publishes this node's location, bandwidth and latency,
//! tracks which peers are alive and picks the best one nearby.
//!
//! ## Startup Sequence
//!
//! 1. Parse flags, load configuration (file, environment, flags)
//! 2. Initialize logging and metrics
//! 3. Build and start the node runtime
//! 4. Optionally serve metrics and forward stdin chat
//! 5. Run until Ctrl+C, then shut down gracefully

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use geomesh_node::chat::{spawn_stdin_reader, CHAT_QUEUE_DEPTH};
use geomesh_node::{Cli, NodeRuntime};
use geomesh_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve().context("invalid configuration")?;

    let mut telemetry = TelemetryConfig::from_env();
    if let Some(port) = cli.metrics_port {
        telemetry.metrics_port = port;
    }
    if let Some(id) = &config.node.id {
        telemetry = telemetry.with_node_id(id.clone());
    }
    init_telemetry(&telemetry).context("failed to initialize telemetry")?;

    let mut runtime = NodeRuntime::build(config).await?;
    runtime.start().await?;

    if telemetry.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], telemetry.metrics_port));
        runtime.spawn_metrics(addr).await?;
    }

    if cli.chat {
        let (tx, rx) = mpsc::channel(CHAT_QUEUE_DEPTH);
        spawn_stdin_reader(tx);
        runtime.spawn_chat(rx);
        info!("Chat enabled: lines typed here go to the selected peer");
    }

    info!(peer_id = %runtime.local_id(), "Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
