//! # Test Doubles
//!
//! In-memory collaborators that record how the control plane drives them,
//! plus on-disk parameter fixtures. Compiled for tests and under the
//! `test-utils` feature.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_bus::{ActiveSignal, ActiveState};
use shared_crypto::{blake3_hash, SignatureScheme};
use shared_types::{BridgeMode, ControlCommand, KeyMaterial, TrustRoot};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use crate::container::{BridgeConfig, PLATFORM_VERSION};
use crate::parameters::{
    DevNetworkAuthority, ParameterError, StaticTrustRoot, TrustRootSource,
    VerifiedNetworkParameters,
};
use crate::ports::{
    CollaboratorFactory, ControlEndpoint, ControlTunnel, KeyMaterialSource, Lifecycle,
    ListenerControl, ListenerParts, QueueConnector, TerminationSignal, TransportError,
};

fn injected(what: &str) -> TransportError {
    TransportError::Io(std::io::Error::other(format!("{what}: injected failure")))
}

/// Key material used by every double.
#[must_use]
pub fn test_keys() -> KeyMaterial {
    KeyMaterial {
        identity: "O=Bridge Test, L=London, C=GB".to_string(),
        keystore: vec![0x42; 32],
        truststore: vec![0x24; 16],
    }
}

/// Verified parameters with the given frame limit, without touching disk.
#[must_use]
pub fn fixture_parameters(max_message_size: u32) -> VerifiedNetworkParameters {
    let parameters = DevNetworkAuthority::default_parameters(max_message_size, 1);
    let hash = blake3_hash(&max_message_size.to_be_bytes());
    VerifiedNetworkParameters::new(parameters, hash, "CN=Fixture Signer".to_string())
}

/// Start/stop bookkeeping shared by the doubles.
#[derive(Default)]
struct Counters {
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_start: AtomicBool,
}

impl Counters {
    fn start(&self, what: &str) -> Result<(), TransportError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(injected(what));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// LISTENER
// =============================================================================

/// Listener double. `active()` is true between start and stop.
pub struct FakeListener {
    max_message_size: u32,
    ready: ActiveState,
    listening: ActiveState,
    keys: Mutex<Option<KeyMaterial>>,
    activations: AtomicUsize,
    counters: Counters,
}

impl FakeListener {
    /// New listener with the frame limit it was constructed with.
    #[must_use]
    pub fn new(max_message_size: u32) -> Arc<Self> {
        Arc::new(Self {
            max_message_size,
            ready: ActiveState::new("fake-listener"),
            listening: ActiveState::new("fake-listener-socket"),
            keys: Mutex::new(None),
            activations: AtomicUsize::new(0),
            counters: Counters::default(),
        })
    }

    /// Both views of this listener.
    #[must_use]
    pub fn parts(self: &Arc<Self>) -> ListenerParts {
        ListenerParts {
            service: Arc::clone(self) as Arc<dyn Lifecycle>,
            control: Arc::clone(self) as Arc<dyn ListenerControl>,
        }
    }

    /// Force the readiness signal.
    pub fn set_ready(&self, ready: bool) {
        self.ready.set(ready);
    }

    /// Make the next starts fail.
    pub fn fail_start(&self) {
        self.counters.fail_start.store(true, Ordering::SeqCst);
    }

    /// Successful starts.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.counters.starts.load(Ordering::SeqCst)
    }

    /// Stops.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.counters.stops.load(Ordering::SeqCst)
    }

    /// Successful activations.
    #[must_use]
    pub fn activation_count(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    /// Keys currently provisioned.
    #[must_use]
    pub fn keys(&self) -> Option<KeyMaterial> {
        self.keys.lock().clone()
    }

    /// Frame limit passed at construction.
    #[must_use]
    pub fn max_message_size_seen(&self) -> u32 {
        self.max_message_size
    }
}

#[async_trait]
impl Lifecycle for FakeListener {
    fn name(&self) -> &str {
        "fake-listener"
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.counters.start("listener")?;
        self.ready.set(true);
        Ok(())
    }

    async fn stop(&self) {
        self.counters.stop();
        self.keys.lock().take();
        self.listening.set(false);
        self.ready.set(false);
    }

    fn active(&self) -> ActiveSignal {
        self.ready.signal()
    }
}

#[async_trait]
impl ListenerControl for FakeListener {
    async fn activate(&self, keys: KeyMaterial) -> Result<(), TransportError> {
        if !self.ready.is_active() {
            return Err(TransportError::NotStarted("fake-listener".to_string()));
        }
        *self.keys.lock() = Some(keys);
        self.activations.fetch_add(1, Ordering::SeqCst);
        self.listening.set(true);
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), TransportError> {
        self.keys.lock().take();
        self.listening.set(false);
        Ok(())
    }

    fn listening(&self) -> ActiveSignal {
        self.listening.signal()
    }

    fn max_message_size(&self) -> u32 {
        self.max_message_size
    }

    fn address(&self) -> String {
        "fake://listener".to_string()
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Broker connection double.
pub struct FakeQueue {
    max_message_size: u32,
    connected: ActiveState,
    connect_on_start: AtomicBool,
    counters: Counters,
}

impl FakeQueue {
    /// Queue that stays disconnected until [`Self::set_connected`].
    #[must_use]
    pub fn new(max_message_size: u32) -> Arc<Self> {
        Arc::new(Self {
            max_message_size,
            connected: ActiveState::new("fake-queue"),
            connect_on_start: AtomicBool::new(false),
            counters: Counters::default(),
        })
    }

    /// Queue that reports connected as soon as it starts.
    #[must_use]
    pub fn connecting(max_message_size: u32) -> Arc<Self> {
        let queue = Self::new(max_message_size);
        queue.connect_on_start.store(true, Ordering::SeqCst);
        queue
    }

    /// Simulate the broker connection going up or down.
    pub fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
    }

    /// Make the next starts fail.
    pub fn fail_start(&self) {
        self.counters.fail_start.store(true, Ordering::SeqCst);
    }

    /// Successful starts.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.counters.starts.load(Ordering::SeqCst)
    }

    /// Stops.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.counters.stops.load(Ordering::SeqCst)
    }

    /// Frame limit passed at construction.
    #[must_use]
    pub fn max_message_size_seen(&self) -> u32 {
        self.max_message_size
    }
}

#[async_trait]
impl Lifecycle for FakeQueue {
    fn name(&self) -> &str {
        "fake-queue"
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.counters.start("queue")?;
        if self.connect_on_start.load(Ordering::SeqCst) {
            self.connected.set(true);
        }
        Ok(())
    }

    async fn stop(&self) {
        self.counters.stop();
        self.connected.set(false);
    }

    fn active(&self) -> ActiveSignal {
        self.connected.signal()
    }
}

impl QueueConnector for FakeQueue {
    fn broker(&self) -> String {
        "fake://broker".to_string()
    }

    fn max_message_size(&self) -> u32 {
        self.max_message_size
    }
}

// =============================================================================
// CONTROL CHANNEL
// =============================================================================

/// Control tunnel double. Ready on start; records every command sent.
pub struct FakeTunnel {
    ready: ActiveState,
    sessions: watch::Sender<u64>,
    sent: Mutex<Vec<ControlCommand>>,
    sent_count: watch::Sender<usize>,
    counters: Counters,
}

impl FakeTunnel {
    /// New tunnel.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (sent_count, _) = watch::channel(0);
        let (sessions, _) = watch::channel(0);
        Arc::new(Self {
            ready: ActiveState::new("fake-tunnel"),
            sessions,
            sent: Mutex::new(Vec::new()),
            sent_count,
            counters: Counters::default(),
        })
    }

    /// Simulate the float becoming reachable or unreachable.
    ///
    /// Becoming reachable opens a new session.
    pub fn set_ready(&self, ready: bool) {
        if ready {
            self.sessions.send_modify(|n| *n += 1);
        }
        self.ready.set(ready);
    }

    /// Commands sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<ControlCommand> {
        self.sent.lock().clone()
    }

    /// Wait until at least `n` commands were sent.
    pub async fn wait_for_sent(&self, n: usize) {
        let mut rx = self.sent_count.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    /// Stops.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.counters.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Lifecycle for FakeTunnel {
    fn name(&self) -> &str {
        "fake-tunnel"
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.counters.start("tunnel")?;
        self.set_ready(true);
        Ok(())
    }

    async fn stop(&self) {
        self.counters.stop();
        self.ready.set(false);
    }

    fn active(&self) -> ActiveSignal {
        self.ready.signal()
    }
}

#[async_trait]
impl ControlTunnel for FakeTunnel {
    async fn send(&self, command: ControlCommand) -> Result<(), TransportError> {
        let count = {
            let mut sent = self.sent.lock();
            sent.push(command);
            sent.len()
        };
        self.sent_count.send_replace(count);
        Ok(())
    }

    fn sessions(&self) -> watch::Receiver<u64> {
        self.sessions.subscribe()
    }
}

/// Control endpoint double. Commands are injected with [`Self::push`].
pub struct FakeEndpoint {
    ready: ActiveState,
    tx: mpsc::UnboundedSender<ControlCommand>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ControlCommand>>,
    counters: Counters,
}

impl FakeEndpoint {
    /// New endpoint.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            ready: ActiveState::new("fake-endpoint"),
            tx,
            rx: tokio::sync::Mutex::new(rx),
            counters: Counters::default(),
        })
    }

    /// Deliver a command as if a controller had sent it.
    pub fn push(&self, command: ControlCommand) {
        let _ = self.tx.send(command);
    }

    /// Force the readiness signal.
    pub fn set_ready(&self, ready: bool) {
        self.ready.set(ready);
    }

    /// Stops.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.counters.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Lifecycle for FakeEndpoint {
    fn name(&self) -> &str {
        "fake-endpoint"
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.counters.start("endpoint")?;
        self.ready.set(true);
        Ok(())
    }

    async fn stop(&self) {
        self.counters.stop();
        self.ready.set(false);
    }

    fn active(&self) -> ActiveSignal {
        self.ready.signal()
    }
}

#[async_trait]
impl ControlEndpoint for FakeEndpoint {
    async fn next_command(&self) -> Option<ControlCommand> {
        self.rx.lock().await.recv().await
    }
}

// =============================================================================
// KEYS AND TERMINATION
// =============================================================================

/// Key source returning fixed material.
pub struct StaticKeys(pub KeyMaterial);

impl Default for StaticKeys {
    fn default() -> Self {
        Self(test_keys())
    }
}

#[async_trait]
impl KeyMaterialSource for StaticKeys {
    async fn load(&self) -> Result<KeyMaterial, TransportError> {
        Ok(self.0.clone())
    }
}

/// Cause reported by [`ManualTermination`].
pub const MANUAL_TERMINATION: &str = "manual";

/// Termination hook fired by hand.
pub struct ManualTermination {
    fired: watch::Sender<bool>,
}

impl ManualTermination {
    /// New, unfired hook.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (fired, _) = watch::channel(false);
        Arc::new(Self { fired })
    }

    /// Fire the hook.
    pub fn trigger(&self) {
        self.fired.send_replace(true);
    }

    /// Number of tasks currently waiting on the hook.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.fired.receiver_count()
    }
}

#[async_trait]
impl TerminationSignal for ManualTermination {
    async fn triggered(&self) -> std::io::Result<&'static str> {
        let mut rx = self.fired.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
        Ok(MANUAL_TERMINATION)
    }
}

// =============================================================================
// FACTORY
// =============================================================================

/// Collaborator factory that hands out doubles and keeps them for inspection.
pub struct InMemoryCollaborators {
    trust_root: Mutex<Option<TrustRoot>>,
    termination: Arc<ManualTermination>,
    listeners: Mutex<Vec<Arc<FakeListener>>>,
    queues: Mutex<Vec<Arc<FakeQueue>>>,
    tunnels: Mutex<Vec<Arc<FakeTunnel>>>,
    endpoints: Mutex<Vec<Arc<FakeEndpoint>>>,
    fail_listener_start: AtomicBool,
    fail_queue_start: AtomicBool,
}

impl InMemoryCollaborators {
    /// Factory with no trust root; verification through it fails with
    /// `TrustStoreMissing` until [`Self::trust`] is called.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            trust_root: Mutex::new(None),
            termination: ManualTermination::new(),
            listeners: Mutex::new(Vec::new()),
            queues: Mutex::new(Vec::new()),
            tunnels: Mutex::new(Vec::new()),
            endpoints: Mutex::new(Vec::new()),
            fail_listener_start: AtomicBool::new(false),
            fail_queue_start: AtomicBool::new(false),
        })
    }

    /// Trust `root` for parameter verification.
    pub fn trust(&self, root: TrustRoot) {
        *self.trust_root.lock() = Some(root);
    }

    /// Listeners created from now on fail to start.
    pub fn fail_listener_start(&self) {
        self.fail_listener_start.store(true, Ordering::SeqCst);
    }

    /// Queue connectors created from now on fail to start.
    pub fn fail_queue_start(&self) {
        self.fail_queue_start.store(true, Ordering::SeqCst);
    }

    /// The termination hook handed to supervisors.
    #[must_use]
    pub fn termination_hook(&self) -> Arc<ManualTermination> {
        Arc::clone(&self.termination)
    }

    /// Listeners created so far.
    #[must_use]
    pub fn listeners(&self) -> Vec<Arc<FakeListener>> {
        self.listeners.lock().clone()
    }

    /// Queue connectors created so far.
    #[must_use]
    pub fn queues(&self) -> Vec<Arc<FakeQueue>> {
        self.queues.lock().clone()
    }

    /// Control tunnels created so far.
    #[must_use]
    pub fn tunnels(&self) -> Vec<Arc<FakeTunnel>> {
        self.tunnels.lock().clone()
    }

    /// Control endpoints created so far.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Arc<FakeEndpoint>> {
        self.endpoints.lock().clone()
    }

    /// Total collaborators constructed.
    #[must_use]
    pub fn created(&self) -> usize {
        self.listeners.lock().len()
            + self.queues.lock().len()
            + self.tunnels.lock().len()
            + self.endpoints.lock().len()
    }
}

struct MissingTrustRoot;

impl TrustRootSource for MissingTrustRoot {
    fn load(&self) -> Result<TrustRoot, ParameterError> {
        Err(ParameterError::TrustStoreMissing("in-memory".into()))
    }
}

impl CollaboratorFactory for InMemoryCollaborators {
    fn listener(&self, max_message_size: u32) -> ListenerParts {
        let listener = FakeListener::new(max_message_size);
        if self.fail_listener_start.load(Ordering::SeqCst) {
            listener.fail_start();
        }
        self.listeners.lock().push(Arc::clone(&listener));
        listener.parts()
    }

    fn queue_connector(&self, max_message_size: u32) -> Arc<dyn QueueConnector> {
        let queue = FakeQueue::connecting(max_message_size);
        if self.fail_queue_start.load(Ordering::SeqCst) {
            queue.fail_start();
        }
        self.queues.lock().push(Arc::clone(&queue));
        queue
    }

    fn control_tunnel(&self) -> Arc<dyn ControlTunnel> {
        let tunnel = FakeTunnel::new();
        self.tunnels.lock().push(Arc::clone(&tunnel));
        tunnel
    }

    fn control_endpoint(&self) -> Arc<dyn ControlEndpoint> {
        let endpoint = FakeEndpoint::new();
        self.endpoints.lock().push(Arc::clone(&endpoint));
        endpoint
    }

    fn key_material(&self) -> Arc<dyn KeyMaterialSource> {
        Arc::new(StaticKeys::default())
    }

    fn trust_roots(&self) -> Arc<dyn TrustRootSource> {
        match self.trust_root.lock().clone() {
            Some(root) => Arc::new(StaticTrustRoot(root)),
            None => Arc::new(MissingTrustRoot),
        }
    }

    fn termination(&self) -> Arc<dyn TerminationSignal> {
        Arc::clone(&self.termination) as Arc<dyn TerminationSignal>
    }
}

// =============================================================================
// ON-DISK FIXTURE
// =============================================================================

/// A base directory holding a trust store and signed parameters.
pub struct BridgeFixture {
    dir: TempDir,
    authority: DevNetworkAuthority,
}

impl BridgeFixture {
    /// Write artifacts for a network with the given frame limit and minimum
    /// platform version.
    pub fn new(
        max_message_size: u32,
        minimum_platform_version: u32,
    ) -> Result<Self, ParameterError> {
        let dir = TempDir::new().map_err(|source| ParameterError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let authority = DevNetworkAuthority::generate(SignatureScheme::Ed25519);
        authority.write_artifacts(
            dir.path(),
            &DevNetworkAuthority::default_parameters(max_message_size, minimum_platform_version),
        )?;
        Ok(Self { dir, authority })
    }

    /// Base directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The network's signing hierarchy.
    #[must_use]
    pub fn authority(&self) -> &DevNetworkAuthority {
        &self.authority
    }

    /// Configuration pointing at this fixture, with short test intervals.
    #[must_use]
    pub fn config(&self, mode: BridgeMode) -> BridgeConfig {
        let mut config = BridgeConfig::for_mode(mode);
        config.base_directory = self.path().to_path_buf();
        config.platform_version = PLATFORM_VERSION;
        config.network.reconnect_interval_ms = 20;
        config
    }

    /// Collaborators trusting this fixture's root.
    #[must_use]
    pub fn collaborators(&self) -> Arc<InMemoryCollaborators> {
        let collaborators = InMemoryCollaborators::new();
        collaborators.trust(self.authority.trust_root());
        collaborators
    }
}

/// Upper bound for waits in async tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);
