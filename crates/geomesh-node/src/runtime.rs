//! # Node Runtime
//!
//! Wires the peer directory to its adapters and owns the background tasks.
//!
//! ## Startup Sequence
//!
//! 1. Open the registry backend
//! 2. Build telemetry sources for the configured family
//! 3. Announce bootstrap peers to the address book
//! 4. Bind the overlay listener, sharing the address book
//! 5. Spawn publisher and exchange/refresh/selection loops
//!
//! ## Shutdown Sequence
//!
//! 1. Signal shutdown to every task
//! 2. Wait for tasks to finish (bounded)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use geomesh_directory::{
    AddressBook, ChatHandler, Coordinate, DirectoryRegistry, DiscoveryListener,
    HttpBandwidthProbe, InMemoryRegistry, IpInfoGeolocation, LoggingChatHandler,
    OverlayListener, PeerDirectory, PeerId, RegistryStore, SelectionPolicy, SimulatedTelemetry,
    StatusPublisher, SystemTimeSource, TcpLatencyProbe, TcpOverlay, TelemetrySources,
};

use crate::chat;
use crate::config::{NodeConfig, RegistryBackend, TelemetrySourceKind};
use crate::metrics_server;

/// Upper bound on waiting for tasks at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running miner node.
pub struct NodeRuntime {
    config: NodeConfig,
    local_id: PeerId,
    address_book: AddressBook,
    overlay: Arc<TcpOverlay>,
    directory: Arc<PeerDirectory>,
    publisher: Arc<StatusPublisher>,
    chat_handler: Arc<dyn ChatHandler>,
    reference: Option<Coordinate>,
    policy: SelectionPolicy,
    selected: watch::Sender<Option<PeerId>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeRuntime {
    /// Build a node from validated configuration.
    ///
    /// Inbound chat messages are logged.
    pub async fn build(config: NodeConfig) -> Result<Self> {
        Self::build_with_chat_handler(config, Arc::new(LoggingChatHandler)).await
    }

    /// Build a node that hands inbound chat messages to `chat_handler`.
    pub async fn build_with_chat_handler(
        config: NodeConfig,
        chat_handler: Arc<dyn ChatHandler>,
    ) -> Result<Self> {
        let local_id = config.node_id();
        let registry = open_registry(&config).await?;
        let sources = telemetry_sources(&config)?;
        let reference = config.reference()?;
        let time_source = Arc::new(SystemTimeSource::new());

        let address_book = AddressBook::new();
        for peer in &config.peers {
            address_book.on_peer_discovered(peer.to_discovery());
        }

        let overlay = Arc::new(TcpOverlay::new(local_id.clone(), address_book.clone()));

        let directory = Arc::new(PeerDirectory::new(
            local_id.clone(),
            Arc::clone(&registry),
            overlay.clone(),
            time_source.clone(),
            config.directory_config(),
        ));

        let publisher = Arc::new(
            StatusPublisher::new(local_id.clone(), registry, sources, time_source)
                .with_interval(config.publish_interval()),
        );

        let (selected, _) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            policy: config.selection_policy(),
            config,
            local_id,
            address_book,
            overlay,
            directory,
            publisher,
            chat_handler,
            reference,
            selected,
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
        })
    }

    /// This node's id.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Address book feeding the overlay transport.
    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    /// The peer directory.
    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    /// Observe the selected peer.
    pub fn subscribe_selection(&self) -> watch::Receiver<Option<PeerId>> {
        self.selected.subscribe()
    }

    /// Bind the overlay listener and spawn the publish and refresh loops.
    ///
    /// Returns the address the listener actually bound.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        info!("===========================================");
        info!("  GeoMesh Node v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        let listener = OverlayListener::bind(
            self.config.node.listen_addr,
            self.local_id.clone(),
            Arc::clone(&self.chat_handler),
        )
        .await
        .with_context(|| {
            format!(
                "failed to bind overlay listener on {}",
                self.config.node.listen_addr
            )
        })?
        .with_address_book(self.address_book.clone());
        let listen_addr = listener.local_addr()?;
        self.tasks.push(tokio::spawn(listener.run(self.shutdown_rx.clone())));

        let publisher = Arc::clone(&self.publisher);
        let shutdown = self.shutdown_rx.clone();
        self.tasks
            .push(tokio::spawn(async move { publisher.run(shutdown).await }));

        let selection = SelectionLoop {
            directory: Arc::clone(&self.directory),
            overlay: Arc::clone(&self.overlay),
            advertise: listen_addr,
            reference: self.reference,
            policy: self.policy,
            selected: self.selected.clone(),
        };
        let period = self.config.refresh_interval();
        let shutdown = self.shutdown_rx.clone();
        self.tasks
            .push(tokio::spawn(async move { selection.run(period, shutdown).await }));

        info!(peer_id = %self.local_id, %listen_addr, "Node started");
        info!(
            relay_enabled = self.config.node.relay_enabled,
            telemetry_source = ?self.config.node.telemetry_source,
            bootstrap_peers = self.config.peers.len(),
            "Node role"
        );
        if self.reference.is_none() {
            warn!("No reference location configured, peer selection is disabled");
        }

        Ok(listen_addr)
    }

    /// Serve `/metrics` and `/health` on `addr`.
    pub async fn spawn_metrics(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = metrics_server::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics endpoint on {addr}"))?;
        let bound = listener.local_addr()?;

        let shutdown = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            if let Err(err) = metrics_server::serve(listener, shutdown).await {
                error!(error = %err, "Metrics endpoint failed");
            }
        }));
        Ok(bound)
    }

    /// Forward lines from `lines` to whichever peer is selected.
    pub fn spawn_chat(&mut self, lines: mpsc::Receiver<String>) {
        let task = chat::run_chat(
            self.overlay.clone(),
            self.selected.subscribe(),
            lines,
            self.shutdown_rx.clone(),
        );
        self.tasks.push(tokio::spawn(task));
    }

    /// Signal every task to stop and wait for them.
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown...");
        self.shutdown_tx.send_replace(true);

        let drain = drain_tasks(self.tasks);
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Some tasks did not stop in time");
        }
        info!("Shutdown complete");
    }
}

async fn drain_tasks(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(err) = task.await {
            error!(error = %err, "Task panicked");
        }
    }
}

/// Periodic peer exchange, refresh and selection.
///
/// Exchanging first lets a refresh probe peers learned in the same tick.
struct SelectionLoop {
    directory: Arc<PeerDirectory>,
    overlay: Arc<TcpOverlay>,
    advertise: SocketAddr,
    reference: Option<Coordinate>,
    policy: SelectionPolicy,
    selected: watch::Sender<Option<PeerId>>,
}

impl SelectionLoop {
    async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let learned = self.overlay.exchange_round(self.advertise).await;
                    if learned > 0 {
                        debug!(learned, "Learned peers through exchange");
                    }
                    if let Err(err) = self.directory.refresh().await {
                        warn!(error = %err, "Directory refresh failed, keeping previous snapshot");
                    }
                    self.select();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Selection loop stopped");
                        break;
                    }
                }
            }
        }
    }

    fn select(&self) {
        let Some(reference) = self.reference else {
            return;
        };

        let best = self.directory.select_best(&reference, &self.policy);
        let choice = match &best {
            Some(candidate) => {
                info!(
                    peer_id = %candidate.peer_id(),
                    distance_km = candidate.distance_km,
                    latency_ms = ?candidate.record.latency_ms,
                    bandwidth_mbps = ?candidate.record.bandwidth_total(),
                    "Best peer selected"
                );
                Some(candidate.peer_id().clone())
            }
            None => {
                debug!(
                    max_distance_km = self.policy.max_distance_km,
                    "No live peer within range"
                );
                None
            }
        };

        self.selected.send_if_modified(|current| {
            if *current == choice {
                false
            } else {
                *current = choice;
                true
            }
        });
    }
}

async fn open_registry(config: &NodeConfig) -> Result<Arc<dyn RegistryStore>> {
    match (config.registry.backend, &config.registry.path) {
        (RegistryBackend::Memory, _) => {
            warn!("Using an in-memory registry, other nodes cannot see this one");
            Ok(Arc::new(InMemoryRegistry::new()))
        }
        (RegistryBackend::Directory, Some(path)) => {
            let registry = DirectoryRegistry::open(path)
                .await
                .with_context(|| format!("failed to open registry at {}", path.display()))?;
            info!(path = %path.display(), "Using directory registry");
            Ok(Arc::new(registry))
        }
        (RegistryBackend::Directory, None) => {
            anyhow::bail!("registry.backend = \"directory\" requires registry.path")
        }
    }
}

fn telemetry_sources(config: &NodeConfig) -> Result<TelemetrySources> {
    match config.node.telemetry_source {
        TelemetrySourceKind::Simulated => {
            let simulated = Arc::new(match config.simulated_location()? {
                Some(location) => SimulatedTelemetry::at(location),
                None => SimulatedTelemetry::unlocated(),
            });
            Ok(TelemetrySources {
                geolocation: simulated.clone(),
                bandwidth: simulated.clone(),
                latency: simulated,
            })
        }
        TelemetrySourceKind::System => {
            let telemetry = &config.telemetry;
            Ok(TelemetrySources {
                geolocation: Arc::new(
                    IpInfoGeolocation::new(&telemetry.geolocation_url)
                        .context("failed to build geolocation client")?,
                ),
                bandwidth: Arc::new(
                    HttpBandwidthProbe::new(&telemetry.bandwidth_url)
                        .context("failed to build bandwidth client")?,
                ),
                latency: Arc::new(TcpLatencyProbe::new(&telemetry.latency_target)),
            })
        }
    }
}
