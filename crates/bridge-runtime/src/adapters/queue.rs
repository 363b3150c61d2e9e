//! TCP connection to the message broker.
//!
//! The connector dials the broker in the background and keeps redialling
//! after `reconnect_interval` whenever the connection drops. `active()` is
//! true exactly while a connection is open. The broker protocol itself is
//! carried by the transport layer, not here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_bus::{ActiveSignal, ActiveState};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ports::{Lifecycle, QueueConnector, TransportError};

struct Dialer {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Reconnecting broker connection.
pub struct TcpQueueConnector {
    broker: String,
    max_message_size: u32,
    reconnect_interval: Duration,
    connected: ActiveState,
    dialer: Mutex<Option<Dialer>>,
}

impl TcpQueueConnector {
    /// Connector for `broker`.
    #[must_use]
    pub fn new(
        broker: impl Into<String>,
        max_message_size: u32,
        reconnect_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker: broker.into(),
            max_message_size,
            reconnect_interval,
            connected: ActiveState::new("queue-connection"),
            dialer: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Lifecycle for TcpQueueConnector {
    fn name(&self) -> &str {
        "queue-connector"
    }

    async fn start(&self) -> Result<(), TransportError> {
        let mut dialer = self.dialer.lock();
        if dialer.is_none() {
            let (shutdown, shutdown_rx) = oneshot::channel();
            let handle = tokio::spawn(dial(
                self.broker.clone(),
                self.reconnect_interval,
                self.connected.clone(),
                shutdown_rx,
            ));
            *dialer = Some(Dialer { shutdown, handle });
        }
        Ok(())
    }

    async fn stop(&self) {
        let dialer = self.dialer.lock().take();
        if let Some(dialer) = dialer {
            let _ = dialer.shutdown.send(());
            if let Err(e) = dialer.handle.await {
                warn!(error = %e, "Queue dialer ended abnormally");
            }
        }
        self.connected.set(false);
    }

    fn active(&self) -> ActiveSignal {
        self.connected.signal()
    }
}

impl QueueConnector for TcpQueueConnector {
    fn broker(&self) -> String {
        self.broker.clone()
    }

    fn max_message_size(&self) -> u32 {
        self.max_message_size
    }
}

async fn dial(
    broker: String,
    reconnect_interval: Duration,
    connected: ActiveState,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let attempt = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            attempt = TcpStream::connect(&broker) => attempt,
        };

        match attempt {
            Ok(mut stream) => {
                info!(broker = %broker, "Connected to broker");
                connected.set(true);
                let closed = tokio::select! {
                    biased;
                    _ = &mut shutdown => false,
                    _ = hold(&mut stream) => true,
                };
                connected.set(false);
                if !closed {
                    break;
                }
                warn!(broker = %broker, "Broker connection lost");
            }
            Err(e) => debug!(broker = %broker, error = %e, "Broker unreachable"),
        }

        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(reconnect_interval) => {}
        }
    }
}

/// Resolve when the peer closes the connection.
async fn hold(stream: &mut TcpStream) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
