//! JSON-lines control channel between a bridge controller and its float.
//!
//! The float (FloatOuter) listens on the control address with a
//! [`TcpControlEndpoint`]; the controller (FloatInner) dials it with a
//! [`TcpControlTunnel`]. Each command is one JSON object per line.
//!
//! Activation is bound to the controller connection that carried it. When
//! the most recent controller goes away the endpoint yields a synthetic
//! `Deactivate`, so an outer float never serves without a live inner half.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_bus::{ActiveSignal, ActiveState};
use shared_types::ControlCommand;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::ports::{ControlEndpoint, ControlTunnel, Lifecycle, TransportError};

/// Longest accepted command line.
pub const MAX_COMMAND_LINE: usize = 64 * 1024;

struct Worker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    async fn stop(self, what: &str) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "{what} ended abnormally");
        }
    }
}

// =============================================================================
// TUNNEL (controller side)
// =============================================================================

/// Outbound control connection, redialled while started.
pub struct TcpControlTunnel {
    address: String,
    reconnect_interval: Duration,
    connected: ActiveState,
    sessions: watch::Sender<u64>,
    writer: Arc<tokio::sync::Mutex<Option<OwnedWriteHalf>>>,
    dialer: Mutex<Option<Worker>>,
}

impl TcpControlTunnel {
    /// Tunnel to the float control endpoint at `address`.
    #[must_use]
    pub fn new(address: impl Into<String>, reconnect_interval: Duration) -> Arc<Self> {
        let (sessions, _) = watch::channel(0);
        Arc::new(Self {
            address: address.into(),
            reconnect_interval,
            connected: ActiveState::new("control-tunnel"),
            sessions,
            writer: Arc::new(tokio::sync::Mutex::new(None)),
            dialer: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Lifecycle for TcpControlTunnel {
    fn name(&self) -> &str {
        "control-tunnel"
    }

    async fn start(&self) -> Result<(), TransportError> {
        let mut dialer = self.dialer.lock();
        if dialer.is_none() {
            let (shutdown, shutdown_rx) = oneshot::channel();
            let handle = tokio::spawn(dial(
                self.address.clone(),
                self.reconnect_interval,
                self.connected.clone(),
                self.sessions.clone(),
                Arc::clone(&self.writer),
                shutdown_rx,
            ));
            *dialer = Some(Worker { shutdown, handle });
        }
        Ok(())
    }

    async fn stop(&self) {
        let dialer = self.dialer.lock().take();
        if let Some(dialer) = dialer {
            dialer.stop("Control tunnel dialer").await;
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.connected.set(false);
    }

    fn active(&self) -> ActiveSignal {
        self.connected.signal()
    }
}

#[async_trait]
impl ControlTunnel for TcpControlTunnel {
    async fn send(&self, command: ControlCommand) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(&command)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(TransportError::NotConnected(self.address.clone()));
        };
        if let Err(e) = stream.write_all(&line).await {
            writer.take();
            self.connected.set(false);
            return Err(e.into());
        }
        debug!(command = command.name(), "Control command sent");
        Ok(())
    }

    fn sessions(&self) -> watch::Receiver<u64> {
        self.sessions.subscribe()
    }
}

async fn dial(
    address: String,
    reconnect_interval: Duration,
    connected: ActiveState,
    sessions: watch::Sender<u64>,
    writer: Arc<tokio::sync::Mutex<Option<OwnedWriteHalf>>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let attempt = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            attempt = TcpStream::connect(&address) => attempt,
        };

        match attempt {
            Ok(stream) => {
                let (mut read_half, write_half) = stream.into_split();
                *writer.lock().await = Some(write_half);
                let mut session = 0;
                sessions.send_modify(|n| {
                    *n += 1;
                    session = *n;
                });
                connected.set(true);
                info!(address = %address, session, "Control tunnel connected");

                let mut buf = [0u8; 256];
                let closed = tokio::select! {
                    biased;
                    _ = &mut shutdown => false,
                    _ = async {
                        while let Ok(n) = read_half.read(&mut buf).await {
                            if n == 0 {
                                break;
                            }
                        }
                    } => true,
                };

                writer.lock().await.take();
                connected.set(false);
                if !closed {
                    break;
                }
                warn!(address = %address, "Control tunnel lost");
            }
            Err(e) => debug!(address = %address, error = %e, "Float control endpoint unreachable"),
        }

        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(reconnect_interval) => {}
        }
    }
}

// =============================================================================
// ENDPOINT (float side)
// =============================================================================

/// Inbound control listener on a remotely activated float.
pub struct TcpControlEndpoint {
    address: String,
    accepting: ActiveState,
    tx: Mutex<Option<mpsc::UnboundedSender<ControlCommand>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ControlCommand>>,
    acceptor: Mutex<Option<Worker>>,
    bound: Mutex<Option<SocketAddr>>,
}

impl TcpControlEndpoint {
    /// Endpoint that will listen on `address`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            address: address.into(),
            accepting: ActiveState::new("control-endpoint"),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            acceptor: Mutex::new(None),
            bound: Mutex::new(None),
        })
    }

    /// Bound address while started.
    #[must_use]
    pub fn local_address(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }
}

#[async_trait]
impl Lifecycle for TcpControlEndpoint {
    fn name(&self) -> &str {
        "control-endpoint"
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self.acceptor.lock().is_some() {
            return Ok(());
        }
        let Some(tx) = self.tx.lock().clone() else {
            return Err(TransportError::NotStarted(format!(
                "{} (already stopped)",
                self.name()
            )));
        };

        let listener = TcpListener::bind(&self.address).await?;
        let bound = listener.local_addr()?;
        *self.bound.lock() = Some(bound);

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(accept_commands(listener, tx, shutdown_rx));
        *self.acceptor.lock() = Some(Worker { shutdown, handle });
        self.accepting.set(true);
        info!(address = %bound, "Control endpoint listening");
        Ok(())
    }

    async fn stop(&self) {
        let acceptor = self.acceptor.lock().take();
        if let Some(acceptor) = acceptor {
            acceptor.stop("Control endpoint").await;
        }
        // Closing the channel ends `next_command`.
        self.tx.lock().take();
        self.bound.lock().take();
        self.accepting.set(false);
    }

    fn active(&self) -> ActiveSignal {
        self.accepting.signal()
    }
}

#[async_trait]
impl ControlEndpoint for TcpControlEndpoint {
    async fn next_command(&self) -> Option<ControlCommand> {
        self.rx.lock().await.recv().await
    }
}

async fn accept_commands(
    listener: TcpListener,
    tx: mpsc::UnboundedSender<ControlCommand>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let latest = Arc::new(AtomicU64::new(0));
    let mut controllers = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let session = latest.fetch_add(1, Ordering::AcqRel) + 1;
                    info!(remote = %remote, session, "Controller connected");
                    controllers.spawn(read_commands(
                        stream,
                        remote,
                        ControllerSession {
                            id: session,
                            latest: Arc::clone(&latest),
                        },
                        tx.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "Control accept failed"),
            },
            Some(_) = controllers.join_next() => {}
        }
    }
    controllers.shutdown().await;
}

/// Identity of one controller connection.
struct ControllerSession {
    id: u64,
    latest: Arc<AtomicU64>,
}

impl ControllerSession {
    /// False once a newer controller has connected.
    fn is_current(&self) -> bool {
        self.latest.load(Ordering::Acquire) == self.id
    }
}

async fn read_commands(
    stream: TcpStream,
    remote: SocketAddr,
    session: ControllerSession,
    tx: mpsc::UnboundedSender<ControlCommand>,
) {
    let mut lines = BufReader::new(stream).take(u64::MAX);
    let mut line = String::new();
    loop {
        line.clear();
        lines.set_limit(MAX_COMMAND_LINE as u64 + 1);
        match lines.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) if !line.ends_with('\n') && line.len() > MAX_COMMAND_LINE => {
                warn!(remote = %remote, "Control line too long, disconnecting");
                break;
            }
            Ok(_) => match serde_json::from_str::<ControlCommand>(line.trim_end()) {
                Ok(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(remote = %remote, error = %e, "Malformed control command"),
            },
            Err(e) => {
                debug!(remote = %remote, error = %e, "Control connection closed");
                break;
            }
        }
    }

    if session.is_current() {
        info!(remote = %remote, "Controller disconnected, deactivating float");
        let _ = tx.send(ControlCommand::Deactivate);
    } else {
        info!(remote = %remote, "Superseded controller disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_keys, TEST_TIMEOUT};

    async fn endpoint() -> Arc<TcpControlEndpoint> {
        let endpoint = TcpControlEndpoint::new("127.0.0.1:0");
        endpoint.start().await.unwrap();
        endpoint
    }

    #[tokio::test]
    async fn test_commands_cross_the_tunnel() {
        let endpoint = endpoint().await;
        let address = endpoint.local_address().unwrap().to_string();
        let tunnel = TcpControlTunnel::new(address, Duration::from_millis(20));

        assert!(matches!(
            tunnel.send(ControlCommand::Deactivate).await,
            Err(TransportError::NotConnected(_))
        ));

        tunnel.start().await.unwrap();
        tokio::time::timeout(TEST_TIMEOUT, tunnel.active().wait_for(true))
            .await
            .unwrap();

        let activate = ControlCommand::Activate {
            max_message_size: 10_000,
            parameters_hash: "ab".repeat(32),
            keys: test_keys(),
        };
        tunnel.send(activate.clone()).await.unwrap();
        tunnel.send(ControlCommand::Deactivate).await.unwrap();

        let first = tokio::time::timeout(TEST_TIMEOUT, endpoint.next_command())
            .await
            .unwrap();
        let second = tokio::time::timeout(TEST_TIMEOUT, endpoint.next_command())
            .await
            .unwrap();
        assert_eq!(first, Some(activate));
        assert_eq!(second, Some(ControlCommand::Deactivate));

        tunnel.stop().await;
        endpoint.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let endpoint = endpoint().await;
        let mut raw = TcpStream::connect(endpoint.local_address().unwrap())
            .await
            .unwrap();
        raw.write_all(b"{\"command\":\"explode\"}\n{\"command\":\"deactivate\"}\n")
            .await
            .unwrap();

        let command = tokio::time::timeout(TEST_TIMEOUT, endpoint.next_command())
            .await
            .unwrap();
        assert_eq!(command, Some(ControlCommand::Deactivate));
        endpoint.stop().await;
    }

    async fn next(endpoint: &TcpControlEndpoint) -> Option<ControlCommand> {
        tokio::time::timeout(TEST_TIMEOUT, endpoint.next_command())
            .await
            .unwrap()
    }

    async fn controller(endpoint: &TcpControlEndpoint, hash: &str) -> TcpStream {
        let mut stream = TcpStream::connect(endpoint.local_address().unwrap())
            .await
            .unwrap();
        let mut line = serde_json::to_vec(&ControlCommand::Activate {
            max_message_size: 10_000,
            parameters_hash: hash.to_string(),
            keys: test_keys(),
        })
        .unwrap();
        line.push(b'\n');
        stream.write_all(&line).await.unwrap();
        stream
    }

    #[tokio::test]
    async fn test_controller_loss_deactivates() {
        let endpoint = endpoint().await;
        let stream = controller(&endpoint, "aa").await;
        assert!(matches!(next(&endpoint).await, Some(ControlCommand::Activate { .. })));

        drop(stream);
        assert_eq!(next(&endpoint).await, Some(ControlCommand::Deactivate));
        endpoint.stop().await;
    }

    #[tokio::test]
    async fn test_superseded_controller_loss_is_ignored() {
        let endpoint = endpoint().await;
        let first = controller(&endpoint, "aa").await;
        assert!(matches!(
            next(&endpoint).await,
            Some(ControlCommand::Activate { parameters_hash, .. }) if parameters_hash == "aa"
        ));
        let second = controller(&endpoint, "bb").await;
        assert!(matches!(
            next(&endpoint).await,
            Some(ControlCommand::Activate { parameters_hash, .. }) if parameters_hash == "bb"
        ));

        drop(first);
        assert!(
            tokio::time::timeout(Duration::from_millis(200), endpoint.next_command())
                .await
                .is_err()
        );

        drop(second);
        assert_eq!(next(&endpoint).await, Some(ControlCommand::Deactivate));
        endpoint.stop().await;
    }

    #[tokio::test]
    async fn test_tunnel_counts_sessions_across_reconnects() {
        let endpoint = endpoint().await;
        let address = endpoint.local_address().unwrap();
        let tunnel = TcpControlTunnel::new(address.to_string(), Duration::from_millis(20));
        let mut sessions = tunnel.sessions();
        assert_eq!(*sessions.borrow_and_update(), 0);

        tunnel.start().await.unwrap();
        tokio::time::timeout(TEST_TIMEOUT, sessions.wait_for(|n| *n == 1))
            .await
            .unwrap()
            .unwrap();

        // Float restarts on the same address.
        endpoint.stop().await;
        let restarted = TcpControlEndpoint::new(address.to_string());
        restarted.start().await.unwrap();
        tokio::time::timeout(TEST_TIMEOUT, sessions.wait_for(|n| *n == 2))
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(TEST_TIMEOUT, tunnel.active().wait_for(true))
            .await
            .unwrap();

        tunnel.stop().await;
        restarted.stop().await;
    }

    #[tokio::test]
    async fn test_endpoint_stop_ends_commands_and_drops_tunnel() {
        let endpoint = endpoint().await;
        let tunnel = TcpControlTunnel::new(
            endpoint.local_address().unwrap().to_string(),
            Duration::from_secs(60),
        );
        tunnel.start().await.unwrap();
        tokio::time::timeout(TEST_TIMEOUT, tunnel.active().wait_for(true))
            .await
            .unwrap();

        endpoint.stop().await;
        assert!(!endpoint.active().is_active());
        assert_eq!(endpoint.next_command().await, None);
        tokio::time::timeout(TEST_TIMEOUT, tunnel.active().wait_for(false))
            .await
            .unwrap();

        tunnel.stop().await;
    }
}
