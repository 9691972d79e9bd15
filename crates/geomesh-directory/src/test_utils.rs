//! Test utilities for the peer directory.
//!
//! Deterministic stand-ins for every outbound port. Enable with the
//! `test-utils` feature flag.
//!
//! # Example
//!
//! ```rust,ignore
//! use geomesh_directory::test_utils::FixedTimeSource;
//! use geomesh_directory::TimeSource;
//!
//! let time_source = FixedTimeSource::new(1000);
//! assert_eq!(time_source.now().as_secs(), 1000);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::adapters::InMemoryRegistry;
use crate::domain::{
    Bandwidth, Location, PeerId, RegistryError, TelemetryError, Timestamp, TransportError,
};
use crate::ports::{
    BandwidthSource, ChatHandler, GeolocationSource, LatencySource, ProbeTransport, RegistryScan,
    RegistryStore, SessionSink, SessionTransport, TimeSource,
};

// =============================================================================
// TIME
// =============================================================================

/// A time source that returns a settable timestamp.
#[derive(Debug, Default)]
pub struct FixedTimeSource {
    timestamp: AtomicU64,
}

impl FixedTimeSource {
    /// Create a time source frozen at `timestamp` seconds.
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp: AtomicU64::new(timestamp),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, secs: u64) {
        self.timestamp.fetch_add(secs, Ordering::SeqCst);
    }

    /// Get the configured timestamp value.
    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::SeqCst)
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.timestamp())
    }
}

// =============================================================================
// PROBE TRANSPORT
// =============================================================================

/// What a scripted peer does when pinged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeScript {
    /// Answer immediately.
    Answer,
    /// Answer after a delay.
    AnswerAfter(Duration),
    /// Fail with the given error.
    Fail(TransportError),
    /// Never answer.
    Hang,
}

/// Probe transport whose peers follow a script.
///
/// Unscripted peers are unreachable.
#[derive(Debug, Default)]
pub struct ScriptedProbeTransport {
    scripts: Mutex<HashMap<PeerId, ProbeScript>>,
    calls: Mutex<Vec<PeerId>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProbeTransport {
    /// Create a transport with no scripted peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how `peer` reacts to pings.
    pub fn script(&self, peer: impl Into<PeerId>, script: ProbeScript) {
        self.scripts.lock().insert(peer.into(), script);
    }

    /// Every ping so far, in call order.
    pub fn calls(&self) -> Vec<PeerId> {
        self.calls.lock().clone()
    }

    /// Pings issued to `peer`.
    pub fn calls_to(&self, peer: &PeerId) -> usize {
        self.calls.lock().iter().filter(|p| *p == peer).count()
    }

    /// Highest number of pings that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProbeTransport for ScriptedProbeTransport {
    async fn ping(&self, peer: &PeerId) -> Result<(), TransportError> {
        self.calls.lock().push(peer.clone());
        let script = self
            .scripts
            .lock()
            .get(peer)
            .cloned()
            .unwrap_or_else(|| ProbeScript::Fail(TransportError::Unreachable(peer.to_string())));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match script {
            ProbeScript::Answer => Ok(()),
            ProbeScript::AnswerAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            ProbeScript::Fail(err) => Err(err),
            ProbeScript::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Registry that can be switched into failure mode.
///
/// Backed by an `InMemoryRegistry` while healthy.
#[derive(Debug, Clone, Default)]
pub struct FailingRegistry {
    inner: InMemoryRegistry,
    failing: Arc<AtomicBool>,
}

impl FailingRegistry {
    /// A healthy registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that fails every call.
    pub fn failing() -> Self {
        let registry = Self::new();
        registry.set_failing(true);
        registry
    }

    /// Switch failure mode on or off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The backing store.
    pub fn inner(&self) -> &InMemoryRegistry {
        &self.inner
    }

    fn check(&self) -> Result<(), RegistryError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RegistryError::unavailable("registry offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RegistryStore for FailingRegistry {
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), RegistryError> {
        self.check()?;
        self.inner.put(key, value).await
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>, RegistryError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn scan(&self, prefix: &[u8]) -> Result<RegistryScan, RegistryError> {
        self.check()?;
        self.inner.scan(prefix).await
    }
}

// =============================================================================
// TELEMETRY
// =============================================================================

/// Geolocation source with a fixed answer.
#[derive(Debug, Clone)]
pub struct StaticGeolocation(pub Result<Location, TelemetryError>);

#[async_trait]
impl GeolocationSource for StaticGeolocation {
    async fn locate(&self) -> Result<Location, TelemetryError> {
        self.0.clone()
    }
}

/// Bandwidth source with a fixed answer.
#[derive(Debug, Clone)]
pub struct StaticBandwidth(pub Result<Bandwidth, TelemetryError>);

#[async_trait]
impl BandwidthSource for StaticBandwidth {
    async fn measure_bandwidth(&self) -> Result<Bandwidth, TelemetryError> {
        self.0.clone()
    }
}

/// Latency source with a fixed answer.
#[derive(Debug, Clone)]
pub struct StaticLatency(pub Result<f64, TelemetryError>);

#[async_trait]
impl LatencySource for StaticLatency {
    async fn measure_latency(&self) -> Result<f64, TelemetryError> {
        self.0.clone()
    }
}

// =============================================================================
// SESSIONS
// =============================================================================

/// Chat handler that keeps every message.
#[derive(Debug, Default)]
pub struct RecordingChatHandler {
    messages: Mutex<Vec<(PeerId, String)>>,
}

impl RecordingChatHandler {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages received so far.
    pub fn messages(&self) -> Vec<(PeerId, String)> {
        self.messages.lock().clone()
    }
}

impl ChatHandler for RecordingChatHandler {
    fn on_message(&self, from: &PeerId, message: &str) {
        self.messages.lock().push((from.clone(), message.to_string()));
    }
}

/// Session transport that records sent messages in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSessionTransport {
    reachable: Arc<Mutex<Vec<PeerId>>>,
    sent: Arc<Mutex<Vec<(PeerId, String)>>>,
    opens: Arc<Mutex<usize>>,
    broken_sends: Arc<Mutex<usize>>,
}

impl RecordingSessionTransport {
    /// Create a transport where no peer is reachable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `peer` reachable.
    pub fn allow(&self, peer: impl Into<PeerId>) {
        self.reachable.lock().push(peer.into());
    }

    /// Fail the next `count` sends on any session.
    pub fn break_sends(&self, count: usize) {
        *self.broken_sends.lock() = count;
    }

    /// Every message sent through any session.
    pub fn sent(&self) -> Vec<(PeerId, String)> {
        self.sent.lock().clone()
    }

    /// Sessions opened so far.
    pub fn opens(&self) -> usize {
        *self.opens.lock()
    }
}

#[async_trait]
impl SessionTransport for RecordingSessionTransport {
    async fn open_session(&self, peer: &PeerId) -> Result<Box<dyn SessionSink>, TransportError> {
        if !self.reachable.lock().contains(peer) {
            return Err(TransportError::Unreachable(peer.to_string()));
        }
        *self.opens.lock() += 1;
        Ok(Box::new(RecordingSink {
            peer_id: peer.clone(),
            sent: Arc::clone(&self.sent),
            broken_sends: Arc::clone(&self.broken_sends),
        }))
    }
}

struct RecordingSink {
    peer_id: PeerId,
    sent: Arc<Mutex<Vec<(PeerId, String)>>>,
    broken_sends: Arc<Mutex<usize>>,
}

#[async_trait]
impl SessionSink for RecordingSink {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        {
            let mut broken = self.broken_sends.lock();
            if *broken > 0 {
                *broken -= 1;
                return Err(TransportError::Io("connection reset".to_string()));
            }
        }
        self.sent.lock().push((self.peer_id.clone(), message.to_string()));
        Ok(())
    }

    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }
}
