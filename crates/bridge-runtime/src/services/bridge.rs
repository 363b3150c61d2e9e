//! # Bridge Supervisor Service
//!
//! Owns the message-queue side. A follower task tracks the queue connection
//! and keeps the public listener in step with it:
//!
//! ```text
//! queue up (and tunnel up) ──► load keys ──► activate target
//! queue down / tunnel down ──► deactivate target
//! new tunnel session       ──► activate again
//! ```
//!
//! The target is either the float listener in this process (reached through a
//! `Weak` handle, SenderReceiver) or a remote float reached over the control
//! tunnel (FloatInner).

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bridge_telemetry::log_service_event;
use parking_lot::Mutex;
use shared_bus::{ActiveSignal, ActiveState, BridgeEvent, EventPublisher, InMemoryEventBus};
use shared_types::{BridgeMode, ControlCommand, KeyMaterial, ServiceId};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::health::{AggregateSubscription, StateAggregator};
use crate::parameters::VerifiedNetworkParameters;
use crate::ports::{
    ControlTunnel, KeyMaterialSource, ListenerControl, QueueConnector, TransportError,
};
use crate::registry::{Subservice, SubserviceError};

/// Where the bridge sends listener activations.
#[derive(Clone)]
pub enum ActivationTarget {
    /// Listener owned by the float service in this process.
    Local(Weak<dyn ListenerControl>),
    /// Remote float, reached over the control tunnel.
    Remote(Arc<dyn ControlTunnel>),
}

impl ActivationTarget {
    fn describe(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Remote(_) => "remote",
        }
    }

    fn local(&self) -> Result<Arc<dyn ListenerControl>, TransportError> {
        match self {
            Self::Local(weak) => weak
                .upgrade()
                .ok_or_else(|| TransportError::Released("float listener".to_string())),
            Self::Remote(_) => Err(TransportError::Released("local listener".to_string())),
        }
    }

    /// Signal that is true while the target can carry traffic.
    fn readiness(&self) -> Result<ActiveSignal, TransportError> {
        match self {
            Self::Local(_) => Ok(self.local()?.listening()),
            Self::Remote(tunnel) => Ok(tunnel.active()),
        }
    }

    /// Signal that must be up before activation is attempted.
    fn reachable(&self) -> Option<ActiveSignal> {
        match self {
            Self::Local(_) => None,
            Self::Remote(tunnel) => Some(tunnel.active()),
        }
    }

    /// Connection count of a remote target.
    fn sessions(&self) -> Option<watch::Receiver<u64>> {
        match self {
            Self::Local(_) => None,
            Self::Remote(tunnel) => Some(tunnel.sessions()),
        }
    }

    async fn activate(
        &self,
        keys: KeyMaterial,
        max_message_size: u32,
        parameters_hash: &str,
    ) -> Result<(), TransportError> {
        match self {
            Self::Local(_) => self.local()?.activate(keys).await,
            Self::Remote(tunnel) => {
                tunnel
                    .send(ControlCommand::Activate {
                        max_message_size,
                        parameters_hash: parameters_hash.to_string(),
                        keys,
                    })
                    .await
            }
        }
    }

    async fn deactivate(&self) -> Result<(), TransportError> {
        match self {
            Self::Local(_) => self.local()?.deactivate().await,
            Self::Remote(tunnel) => tunnel.send(ControlCommand::Deactivate).await,
        }
    }
}

struct Follower {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Supervises the bridge half: queue connection and listener activation.
pub struct BridgeSupervisorService {
    mode: BridgeMode,
    max_message_size: u32,
    parameters_hash: String,
    queue: Arc<dyn QueueConnector>,
    target: ActivationTarget,
    keys: Arc<dyn KeyMaterialSource>,
    bus: Arc<InMemoryEventBus>,
    retry_interval: Duration,
    state: ActiveState,
    aggregate: Mutex<Option<AggregateSubscription>>,
    follower: Mutex<Option<Follower>>,
}

impl BridgeSupervisorService {
    /// Create the bridge service.
    #[must_use]
    pub fn new(
        mode: BridgeMode,
        parameters: &VerifiedNetworkParameters,
        queue: Arc<dyn QueueConnector>,
        target: ActivationTarget,
        keys: Arc<dyn KeyMaterialSource>,
        bus: Arc<InMemoryEventBus>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            mode,
            max_message_size: parameters.max_message_size(),
            parameters_hash: parameters.hash_hex(),
            queue,
            target,
            keys,
            bus,
            retry_interval,
            state: ActiveState::new(ServiceId::BridgeSupervisor.name()),
            aggregate: Mutex::new(None),
            follower: Mutex::new(None),
        }
    }

    /// The in-process listener handle, if this bridge has one.
    ///
    /// `None` for a bridge controller, which never holds a listener.
    #[must_use]
    pub fn listener_control(&self) -> Option<Weak<dyn ListenerControl>> {
        match &self.target {
            ActivationTarget::Local(weak) => Some(Weak::clone(weak)),
            ActivationTarget::Remote(_) => None,
        }
    }

    /// Activation target.
    #[must_use]
    pub fn target(&self) -> &ActivationTarget {
        &self.target
    }

    /// Frame limit used on the queue and in activations.
    #[must_use]
    pub fn max_message_size(&self) -> u32 {
        self.max_message_size
    }

    fn error(&self, message: impl Into<String>) -> SubserviceError {
        SubserviceError::new(self.id(), message)
    }

    async fn stop_follower(&self) {
        let Some(follower) = self.follower.lock().take() else {
            return;
        };
        let _ = follower.shutdown.send(());
        if let Err(e) = follower.handle.await {
            warn!(error = %e, "Activation follower ended abnormally");
        }
    }
}

struct FollowerContext {
    target: ActivationTarget,
    keys: Arc<dyn KeyMaterialSource>,
    bus: Arc<InMemoryEventBus>,
    broker: String,
    max_message_size: u32,
    parameters_hash: String,
    retry_interval: Duration,
}

impl FollowerContext {
    async fn activate(&self) -> Result<(), TransportError> {
        let keys = self.keys.load().await?;
        let fingerprint = keys.fingerprint();
        self.target
            .activate(keys, self.max_message_size, &self.parameters_hash)
            .await?;
        info!(
            activation = self.target.describe(),
            keys = %fingerprint,
            "Listener activation sent"
        );
        Ok(())
    }

    async fn deactivate(&self) {
        match self.target.deactivate().await {
            Ok(()) => info!(activation = self.target.describe(), "Listener deactivated"),
            Err(e) => debug!(error = %e, "Listener deactivation skipped"),
        }
    }
}

async fn follow(
    context: FollowerContext,
    mut queue: watch::Receiver<bool>,
    mut reachable: Option<watch::Receiver<bool>>,
    mut sessions: Option<watch::Receiver<u64>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connected = false;
    let mut activated = false;
    let mut retry_pending = false;
    let mut session = 0;

    loop {
        let queue_up = *queue.borrow_and_update();
        let target_up = reachable
            .as_mut()
            .map_or(true, |rx| *rx.borrow_and_update());

        // A watch only keeps the latest value, so an outage shorter than one
        // poll is visible only through the session count.
        let current = sessions.as_mut().map_or(0, |rx| *rx.borrow_and_update());
        if current != session {
            session = current;
            if activated {
                debug!(session, "Float reconnected, activation required");
                activated = false;
            }
        }

        if queue_up != connected {
            connected = queue_up;
            let broker = context.broker.clone();
            context.bus.publish(if connected {
                BridgeEvent::QueueConnected { broker }
            } else {
                BridgeEvent::QueueDisconnected { broker }
            });
        }

        let desired = queue_up && target_up;
        if desired && !activated {
            match context.activate().await {
                Ok(()) => {
                    activated = true;
                    retry_pending = false;
                }
                Err(e) => {
                    warn!(error = %e, "Listener activation failed, will retry");
                    retry_pending = true;
                }
            }
        } else if !desired && activated {
            if target_up {
                context.deactivate().await;
            }
            activated = false;
            retry_pending = false;
        } else if !desired {
            retry_pending = false;
        }

        let retry = async {
            if retry_pending {
                tokio::time::sleep(context.retry_interval).await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        let reachable_changed = async {
            match reachable.as_mut() {
                Some(rx) => rx.changed().await,
                None => std::future::pending().await,
            }
        };
        let session_changed = async {
            match sessions.as_mut() {
                Some(rx) => rx.changed().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            changed = queue.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = reachable_changed => {
                if changed.is_err() {
                    break;
                }
            }
            changed = session_changed => {
                if changed.is_err() {
                    break;
                }
            }
            _ = retry => {}
        }
    }

    if activated {
        context.deactivate().await;
    }
}

#[async_trait]
impl Subservice for BridgeSupervisorService {
    fn id(&self) -> ServiceId {
        ServiceId::BridgeSupervisor
    }

    async fn start(&self) -> Result<(), SubserviceError> {
        if let ActivationTarget::Remote(tunnel) = &self.target {
            tunnel
                .start()
                .await
                .map_err(|e| self.error(format!("control tunnel failed to start: {e}")))?;
        }
        self.queue
            .start()
            .await
            .map_err(|e| self.error(format!("queue connector failed to start: {e}")))?;

        let readiness = self
            .target
            .readiness()
            .map_err(|e| self.error(e.to_string()))?;
        let aggregate = StateAggregator::default()
            .observe_into(vec![self.queue.active(), readiness], self.state.clone())
            .map_err(|e| self.error(e.to_string()))?;
        if let Some(previous) = self.aggregate.lock().replace(aggregate) {
            previous.dispose();
        }

        {
            let mut follower = self.follower.lock();
            if follower.is_none() {
                let context = FollowerContext {
                    target: self.target.clone(),
                    keys: Arc::clone(&self.keys),
                    bus: Arc::clone(&self.bus),
                    broker: self.queue.broker(),
                    max_message_size: self.max_message_size,
                    parameters_hash: self.parameters_hash.clone(),
                    retry_interval: self.retry_interval,
                };
                let (shutdown, shutdown_rx) = oneshot::channel();
                let handle = tokio::spawn(follow(
                    context,
                    self.queue.active().subscribe(),
                    self.target.reachable().map(|signal| signal.subscribe()),
                    self.target.sessions(),
                    shutdown_rx,
                ));
                *follower = Some(Follower { shutdown, handle });
            }
        }

        log_service_event!(
            info,
            self.name(),
            "Bridge started",
            mode = %self.mode,
            broker = %self.queue.broker(),
            activation = self.target.describe(),
            max_message_size = self.max_message_size
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubserviceError> {
        self.stop_follower().await;
        self.queue.stop().await;
        if let ActivationTarget::Remote(tunnel) = &self.target {
            tunnel.stop().await;
        }

        if let Some(aggregate) = self.aggregate.lock().take() {
            aggregate.dispose();
        }
        self.state.set(false);

        log_service_event!(info, self.name(), "Bridge stopped");
        Ok(())
    }

    fn active(&self) -> ActiveSignal {
        self.state.signal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture_parameters, FakeListener, FakeQueue, FakeTunnel, StaticKeys};

    const WAIT: Duration = Duration::from_secs(1);

    fn bridge(
        queue: &Arc<FakeQueue>,
        target: ActivationTarget,
        bus: &Arc<InMemoryEventBus>,
    ) -> BridgeSupervisorService {
        let mode = match target {
            ActivationTarget::Local(_) => BridgeMode::SenderReceiver,
            ActivationTarget::Remote(_) => BridgeMode::FloatInner,
        };
        BridgeSupervisorService::new(
            mode,
            &fixture_parameters(10_000),
            Arc::clone(queue) as Arc<dyn QueueConnector>,
            target,
            Arc::new(StaticKeys::default()),
            Arc::clone(bus),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn test_local_activation_follows_queue() {
        let bus = Arc::new(InMemoryEventBus::new());
        let listener = FakeListener::new(10_000);
        listener.parts().service.start().await.unwrap();
        let queue = FakeQueue::new(10_000);
        let control: Arc<dyn ListenerControl> = listener.clone();
        let service = bridge(&queue, ActivationTarget::Local(Arc::downgrade(&control)), &bus);

        service.start().await.unwrap();
        assert!(!service.active().is_active());

        queue.set_connected(true);
        tokio::time::timeout(WAIT, service.active().wait_for(true))
            .await
            .unwrap();
        assert_eq!(listener.activation_count(), 1);

        queue.set_connected(false);
        assert!(!service.active().is_active());
        tokio::time::timeout(WAIT, listener.listening().wait_for(false))
            .await
            .unwrap();

        service.stop().await.unwrap();
        assert_eq!(queue.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_activation_goes_through_tunnel() {
        let bus = Arc::new(InMemoryEventBus::new());
        let queue = FakeQueue::new(10_000);
        let tunnel = FakeTunnel::new();
        let service = bridge(
            &queue,
            ActivationTarget::Remote(Arc::clone(&tunnel) as Arc<dyn ControlTunnel>),
            &bus,
        );
        assert!(service.listener_control().is_none());

        service.start().await.unwrap();
        queue.set_connected(true);
        tokio::time::timeout(WAIT, service.active().wait_for(true))
            .await
            .unwrap();
        tokio::time::timeout(WAIT, tunnel.wait_for_sent(1))
            .await
            .unwrap();

        let sent = tunnel.sent();
        match &sent[0] {
            ControlCommand::Activate {
                max_message_size, ..
            } => assert_eq!(*max_message_size, 10_000),
            other => panic!("unexpected command {other:?}"),
        }

        service.stop().await.unwrap();
        assert!(matches!(
            tunnel.sent().last(),
            Some(ControlCommand::Deactivate)
        ));
        assert_eq!(tunnel.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_tunnel_outage_reactivates_on_return() {
        let bus = Arc::new(InMemoryEventBus::new());
        let queue = FakeQueue::new(10_000);
        let tunnel = FakeTunnel::new();
        let service = bridge(
            &queue,
            ActivationTarget::Remote(Arc::clone(&tunnel) as Arc<dyn ControlTunnel>),
            &bus,
        );

        service.start().await.unwrap();
        queue.set_connected(true);
        tokio::time::timeout(WAIT, tunnel.wait_for_sent(1))
            .await
            .unwrap();

        // Down and back up before the follower polls: only the session
        // count records the reconnect.
        tunnel.set_ready(false);
        assert!(!service.active().is_active());
        tunnel.set_ready(true);
        tokio::time::timeout(WAIT, tunnel.wait_for_sent(2))
            .await
            .unwrap();
        assert!(service.active().is_active());
        assert!(matches!(
            tunnel.sent()[1],
            ControlCommand::Activate { .. }
        ));

        // Each further session is activated exactly once.
        tunnel.set_ready(false);
        tunnel.set_ready(true);
        tokio::time::timeout(WAIT, tunnel.wait_for_sent(3))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(tunnel.sent().len(), 3);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_released_listener_fails_start() {
        let bus = Arc::new(InMemoryEventBus::new());
        let queue = FakeQueue::new(10_000);
        let weak = {
            let listener = FakeListener::new(10_000);
            let control: Arc<dyn ListenerControl> = listener;
            Arc::downgrade(&control)
        };
        let service = bridge(&queue, ActivationTarget::Local(weak), &bus);

        let err = service.start().await.unwrap_err();
        assert_eq!(err.service, ServiceId::BridgeSupervisor);
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_events_published() {
        let bus = Arc::new(InMemoryEventBus::new());
        let mut events = bus.subscribe(shared_bus::EventFilter::topics(vec![
            shared_bus::EventTopic::Network,
        ]));
        let queue = FakeQueue::new(10_000);
        let tunnel = FakeTunnel::new();
        let service = bridge(
            &queue,
            ActivationTarget::Remote(Arc::clone(&tunnel) as Arc<dyn ControlTunnel>),
            &bus,
        );

        service.start().await.unwrap();
        queue.set_connected(true);
        let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap();
        assert!(matches!(event, Some(BridgeEvent::QueueConnected { .. })));

        service.stop().await.unwrap();
    }
}
