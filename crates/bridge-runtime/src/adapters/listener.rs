//! Public TCP listener.
//!
//! `start()` only makes the listener available for activation. The socket is
//! bound by `activate()` and closed by `deactivate()`, which also wipes the
//! key material it was given.
//!
//! Inbound connections are framed with a big-endian `u32` length prefix.
//! A frame larger than the verified `max_message_size` closes the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_telemetry::{metric_inc, INBOUND_CONNECTIONS};
use parking_lot::Mutex;
use shared_bus::{ActiveSignal, ActiveState, BridgeEvent, EventPublisher, InMemoryEventBus};
use shared_types::KeyMaterial;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::ports::{Lifecycle, ListenerControl, ListenerParts, TransportError};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

struct AcceptLoop {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ListenerInner {
    keys: Option<KeyMaterial>,
    accept: Option<AcceptLoop>,
    bound: Option<SocketAddr>,
}

/// TCP implementation of the float's public listener.
pub struct TcpListenerService {
    address: String,
    max_message_size: u32,
    bus: Arc<InMemoryEventBus>,
    ready: ActiveState,
    listening: ActiveState,
    inner: Mutex<ListenerInner>,
}

impl TcpListenerService {
    /// Listener that will bind `address` when activated.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        max_message_size: u32,
        bus: Arc<InMemoryEventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            address: address.into(),
            max_message_size,
            bus,
            ready: ActiveState::new("public-listener"),
            listening: ActiveState::new("public-listener-socket"),
            inner: Mutex::new(ListenerInner::default()),
        })
    }

    /// Both port views of this listener.
    #[must_use]
    pub fn parts(self: &Arc<Self>) -> ListenerParts {
        ListenerParts {
            service: Arc::clone(self) as Arc<dyn Lifecycle>,
            control: Arc::clone(self) as Arc<dyn ListenerControl>,
        }
    }

    /// Address the socket is bound to while listening.
    #[must_use]
    pub fn bound_address(&self) -> Option<SocketAddr> {
        self.inner.lock().bound
    }

    /// Identity of the currently provisioned keys.
    #[must_use]
    pub fn identity(&self) -> Option<String> {
        self.inner.lock().keys.as_ref().map(|k| k.identity.clone())
    }
}

fn wipe(mut keys: KeyMaterial) {
    keys.keystore.zeroize();
    keys.truststore.zeroize();
    keys.identity.zeroize();
}

#[async_trait]
impl Lifecycle for TcpListenerService {
    fn name(&self) -> &str {
        "public-listener"
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.ready.set(true);
        Ok(())
    }

    async fn stop(&self) {
        if let Err(e) = self.deactivate().await {
            warn!(error = %e, "Listener deactivation on stop failed");
        }
        self.ready.set(false);
    }

    fn active(&self) -> ActiveSignal {
        self.ready.signal()
    }
}

#[async_trait]
impl ListenerControl for TcpListenerService {
    async fn activate(&self, keys: KeyMaterial) -> Result<(), TransportError> {
        if !self.ready.is_active() {
            return Err(TransportError::NotStarted(self.name().to_string()));
        }

        {
            let mut inner = self.inner.lock();
            if inner.accept.is_some() {
                debug!(identity = %keys.identity, "Replacing listener keys");
                if let Some(previous) = inner.keys.replace(keys) {
                    wipe(previous);
                }
                return Ok(());
            }
        }

        let listener = TcpListener::bind(&self.address).await?;
        let bound = listener.local_addr()?;
        let identity = keys.identity.clone();

        {
            let mut inner = self.inner.lock();
            if inner.accept.is_some() {
                // A concurrent activation won; keep its socket.
                if let Some(previous) = inner.keys.replace(keys) {
                    wipe(previous);
                }
                return Ok(());
            }
            let (shutdown, shutdown_rx) = oneshot::channel();
            let handle = tokio::spawn(accept_loop(
                listener,
                Arc::clone(&self.bus),
                self.max_message_size,
                shutdown_rx,
            ));
            inner.accept = Some(AcceptLoop { shutdown, handle });
            inner.keys = Some(keys);
            inner.bound = Some(bound);
            // Flipped under the lock so it always agrees with `accept`.
            self.listening.set(true);
        }

        info!(address = %bound, identity = %identity, "Public listener activated");
        self.bus.publish(BridgeEvent::ListenerActivated {
            address: bound.to_string(),
            identity,
        });
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), TransportError> {
        let (accept, keys, bound) = {
            let mut inner = self.inner.lock();
            (inner.accept.take(), inner.keys.take(), inner.bound.take())
        };
        if let Some(keys) = keys {
            wipe(keys);
        }
        let Some(accept) = accept else {
            return Ok(());
        };

        let _ = accept.shutdown.send(());
        if let Err(e) = accept.handle.await {
            warn!(error = %e, "Accept loop ended abnormally");
        }
        {
            let inner = self.inner.lock();
            if inner.accept.is_none() {
                self.listening.set(false);
            }
        }

        let address = bound.map_or_else(|| self.address.clone(), |a| a.to_string());
        info!(address = %address, "Public listener deactivated");
        self.bus
            .publish(BridgeEvent::ListenerDeactivated { address });
        Ok(())
    }

    fn listening(&self) -> ActiveSignal {
        self.listening.signal()
    }

    fn max_message_size(&self) -> u32 {
        self.max_message_size
    }

    fn address(&self) -> String {
        self.bound_address()
            .map_or_else(|| self.address.clone(), |a| a.to_string())
    }
}

async fn accept_loop(
    listener: TcpListener,
    bus: Arc<InMemoryEventBus>,
    max_message_size: u32,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    metric_inc!(INBOUND_CONNECTIONS);
                    debug!(remote = %remote, "Inbound connection");
                    bus.publish(BridgeEvent::ConnectionAccepted {
                        remote: remote.to_string(),
                    });
                    connections.spawn(read_frames(stream, remote, max_message_size));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next() => {}
        }
    }
    connections.shutdown().await;
}

async fn read_frames(mut stream: TcpStream, remote: SocketAddr, max_message_size: u32) {
    let mut frame = Vec::new();
    loop {
        let len = match stream.read_u32().await {
            Ok(len) => len,
            Err(_) => return,
        };
        if len > max_message_size {
            warn!(remote = %remote, len, max_message_size, "Frame exceeds limit, closing");
            return;
        }
        frame.resize(len as usize, 0);
        if stream.read_exact(&mut frame).await.is_err() {
            return;
        }
    }
}
