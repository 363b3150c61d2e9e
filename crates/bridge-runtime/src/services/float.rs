//! # Float Supervisor Service
//!
//! Owns the public listener. In FloatOuter mode it also owns the control
//! endpoint a remote bridge controller drives it through: `Activate` hands
//! it key material and opens the socket, `Deactivate` closes it and wipes
//! the keys.
//!
//! The float never initiates outbound connections and never loads long-lived
//! keys itself.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bridge_telemetry::log_service_event;
use parking_lot::Mutex;
use shared_bus::{
    ActiveSignal, ActiveState, BridgeEvent, EventPublisher, InMemoryEventBus,
};
use shared_types::{BridgeMode, ControlCommand, ServiceId};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::health::{AggregateSubscription, StateAggregator};
use crate::parameters::VerifiedNetworkParameters;
use crate::ports::{ControlEndpoint, ListenerControl, ListenerParts};
use crate::registry::{Subservice, SubserviceError};

struct CommandLoop {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Supervises the float half of the bridge.
pub struct FloatSupervisorService {
    mode: BridgeMode,
    max_message_size: u32,
    parameters_hash: String,
    listener: ListenerParts,
    endpoint: Option<Arc<dyn ControlEndpoint>>,
    bus: Arc<InMemoryEventBus>,
    state: ActiveState,
    aggregate: Mutex<Option<AggregateSubscription>>,
    commands: Mutex<Option<CommandLoop>>,
}

impl FloatSupervisorService {
    /// Create the float service.
    ///
    /// `endpoint` is the remote activation channel and is only supplied in
    /// FloatOuter mode.
    #[must_use]
    pub fn new(
        mode: BridgeMode,
        parameters: &VerifiedNetworkParameters,
        listener: ListenerParts,
        endpoint: Option<Arc<dyn ControlEndpoint>>,
        bus: Arc<InMemoryEventBus>,
    ) -> Self {
        Self {
            mode,
            max_message_size: parameters.max_message_size(),
            parameters_hash: parameters.hash_hex(),
            listener,
            endpoint,
            bus,
            state: ActiveState::new(ServiceId::FloatSupervisor.name()),
            aggregate: Mutex::new(None),
            commands: Mutex::new(None),
        }
    }

    /// Non-owning handle to the listener's control capability.
    ///
    /// Upgrading fails once this service has been dropped.
    #[must_use]
    pub fn listener_control(&self) -> Weak<dyn ListenerControl> {
        Arc::downgrade(&self.listener.control)
    }

    /// Frame limit this float enforces.
    #[must_use]
    pub fn max_message_size(&self) -> u32 {
        self.max_message_size
    }

    /// Whether activation arrives over a control endpoint.
    #[must_use]
    pub fn remotely_activated(&self) -> bool {
        self.endpoint.is_some()
    }

    /// True while the public socket is open.
    #[must_use]
    pub fn listening(&self) -> ActiveSignal {
        self.listener.control.listening()
    }

    fn error(&self, message: impl Into<String>) -> SubserviceError {
        SubserviceError::new(self.id(), message)
    }

    async fn stop_command_loop(&self) {
        let Some(commands) = self.commands.lock().take() else {
            return;
        };
        let _ = commands.shutdown.send(());
        if let Err(e) = commands.handle.await {
            warn!(error = %e, "Control command loop ended abnormally");
        }
    }
}

/// Outcome of applying one control command.
async fn apply(
    command: ControlCommand,
    control: &Arc<dyn ListenerControl>,
    max_message_size: u32,
    parameters_hash: &str,
) -> Result<(), String> {
    match command {
        ControlCommand::Activate {
            max_message_size: requested,
            parameters_hash: requested_hash,
            keys,
        } => {
            if requested != max_message_size {
                return Err(format!(
                    "max message size {requested} does not match verified {max_message_size}"
                ));
            }
            if requested_hash != parameters_hash {
                return Err(format!(
                    "controller parameters {requested_hash} differ from local {parameters_hash}"
                ));
            }
            control.activate(keys).await.map_err(|e| e.to_string())
        }
        ControlCommand::Deactivate => control.deactivate().await.map_err(|e| e.to_string()),
    }
}

async fn command_loop(
    endpoint: Arc<dyn ControlEndpoint>,
    control: Arc<dyn ListenerControl>,
    bus: Arc<InMemoryEventBus>,
    max_message_size: u32,
    parameters_hash: String,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let command = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            command = endpoint.next_command() => command,
        };
        let Some(command) = command else {
            debug!("Control endpoint closed");
            break;
        };

        let name = command.name();
        let outcome = apply(command, &control, max_message_size, &parameters_hash).await;
        match &outcome {
            Ok(()) => info!(command = name, "Control command applied"),
            Err(reason) => warn!(command = name, %reason, "Control command rejected"),
        }
        bus.publish(BridgeEvent::ControlCommandReceived {
            command: name.to_string(),
            accepted: outcome.is_ok(),
        });
    }
}

#[async_trait]
impl Subservice for FloatSupervisorService {
    fn id(&self) -> ServiceId {
        ServiceId::FloatSupervisor
    }

    async fn start(&self) -> Result<(), SubserviceError> {
        self.listener
            .service
            .start()
            .await
            .map_err(|e| self.error(format!("listener failed to start: {e}")))?;

        let mut constituents = vec![self.listener.service.active()];

        if let Some(endpoint) = &self.endpoint {
            endpoint
                .start()
                .await
                .map_err(|e| self.error(format!("control endpoint failed to start: {e}")))?;
            constituents.push(endpoint.active());

            let mut commands = self.commands.lock();
            if commands.is_none() {
                let (shutdown, shutdown_rx) = oneshot::channel();
                let handle = tokio::spawn(command_loop(
                    Arc::clone(endpoint),
                    Arc::clone(&self.listener.control),
                    Arc::clone(&self.bus),
                    self.max_message_size,
                    self.parameters_hash.clone(),
                    shutdown_rx,
                ));
                *commands = Some(CommandLoop { shutdown, handle });
            }
        }

        let aggregate = StateAggregator::default()
            .observe_into(constituents, self.state.clone())
            .map_err(|e| self.error(e.to_string()))?;
        if let Some(previous) = self.aggregate.lock().replace(aggregate) {
            previous.dispose();
        }

        log_service_event!(
            info,
            self.name(),
            "Float started",
            mode = %self.mode,
            address = %self.listener.control.address(),
            max_message_size = self.max_message_size,
            remote_activation = self.endpoint.is_some()
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubserviceError> {
        self.stop_command_loop().await;

        if let Err(e) = self.listener.control.deactivate().await {
            warn!(error = %e, "Listener deactivation failed during stop");
        }
        if let Some(endpoint) = &self.endpoint {
            endpoint.stop().await;
        }
        self.listener.service.stop().await;

        if let Some(aggregate) = self.aggregate.lock().take() {
            aggregate.dispose();
        }
        self.state.set(false);

        log_service_event!(info, self.name(), "Float stopped");
        Ok(())
    }

    fn active(&self) -> ActiveSignal {
        self.state.signal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{TcpControlEndpoint, TcpControlTunnel};
    use crate::ports::{ControlTunnel, Lifecycle};
    use crate::testing::{
        fixture_parameters, test_keys, FakeEndpoint, FakeListener, TEST_TIMEOUT,
    };
    use std::time::Duration;

    fn float(
        listener: &Arc<FakeListener>,
        endpoint: Option<Arc<FakeEndpoint>>,
        bus: &Arc<InMemoryEventBus>,
    ) -> FloatSupervisorService {
        let parameters = fixture_parameters(10_000);
        let mode = if endpoint.is_some() {
            BridgeMode::FloatOuter
        } else {
            BridgeMode::SenderReceiver
        };
        FloatSupervisorService::new(
            mode,
            &parameters,
            listener.parts(),
            endpoint.map(|e| e as Arc<dyn ControlEndpoint>),
            Arc::clone(bus),
        )
    }

    #[tokio::test]
    async fn test_active_follows_listener() {
        let bus = Arc::new(InMemoryEventBus::new());
        let listener = FakeListener::new(10_000);
        let service = float(&listener, None, &bus);

        service.start().await.unwrap();
        assert!(service.active().is_active());

        listener.set_ready(false);
        assert!(!service.active().is_active());
        listener.set_ready(true);
        assert!(service.active().is_active());

        service.stop().await.unwrap();
        assert!(!service.active().is_active());
        assert_eq!(listener.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_listener_control_is_non_owning() {
        let bus = Arc::new(InMemoryEventBus::new());
        let listener = FakeListener::new(10_000);
        let service = float(&listener, None, &bus);
        let weak = service.listener_control();
        assert!(weak.upgrade().is_some());

        drop(service);
        drop(listener);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_outer_applies_activate_and_deactivate() {
        let bus = Arc::new(InMemoryEventBus::new());
        let listener = FakeListener::new(10_000);
        let endpoint = FakeEndpoint::new();
        let service = float(&listener, Some(Arc::clone(&endpoint)), &bus);
        let parameters = fixture_parameters(10_000);

        service.start().await.unwrap();
        assert!(service.active().is_active());

        endpoint.push(ControlCommand::Activate {
            max_message_size: 10_000,
            parameters_hash: parameters.hash_hex(),
            keys: test_keys(),
        });
        tokio::time::timeout(Duration::from_secs(1), service.listening().wait_for(true))
            .await
            .unwrap();

        endpoint.push(ControlCommand::Deactivate);
        tokio::time::timeout(Duration::from_secs(1), service.listening().wait_for(false))
            .await
            .unwrap();

        service.stop().await.unwrap();
        assert_eq!(endpoint.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_outer_closes_listener_when_controller_goes_away() {
        let bus = Arc::new(InMemoryEventBus::new());
        let listener = FakeListener::new(10_000);
        let endpoint = TcpControlEndpoint::new("127.0.0.1:0");
        let service = FloatSupervisorService::new(
            BridgeMode::FloatOuter,
            &fixture_parameters(10_000),
            listener.parts(),
            Some(Arc::clone(&endpoint) as Arc<dyn ControlEndpoint>),
            Arc::clone(&bus),
        );
        service.start().await.unwrap();

        let address = endpoint.local_address().unwrap().to_string();
        let tunnel = TcpControlTunnel::new(address, Duration::from_millis(20));
        tunnel.start().await.unwrap();
        tokio::time::timeout(TEST_TIMEOUT, tunnel.active().wait_for(true))
            .await
            .unwrap();
        tunnel
            .send(ControlCommand::Activate {
                max_message_size: 10_000,
                parameters_hash: fixture_parameters(10_000).hash_hex(),
                keys: test_keys(),
            })
            .await
            .unwrap();
        tokio::time::timeout(TEST_TIMEOUT, service.listening().wait_for(true))
            .await
            .unwrap();

        tunnel.stop().await;
        drop(tunnel);
        tokio::time::timeout(TEST_TIMEOUT, service.listening().wait_for(false))
            .await
            .unwrap();
        assert!(service.active().is_active());

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_outer_rejects_mismatched_frame_size() {
        let bus = Arc::new(InMemoryEventBus::new());
        let mut events = bus.subscribe(shared_bus::EventFilter::all());
        let listener = FakeListener::new(10_000);
        let endpoint = FakeEndpoint::new();
        let service = float(&listener, Some(Arc::clone(&endpoint)), &bus);
        let parameters = fixture_parameters(10_000);

        service.start().await.unwrap();
        endpoint.push(ControlCommand::Activate {
            max_message_size: 20_000,
            parameters_hash: parameters.hash_hex(),
            keys: test_keys(),
        });

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(BridgeEvent::ControlCommandReceived {
                command: "activate".to_string(),
                accepted: false,
            })
        );
        assert!(!service.listening().is_active());
        assert_eq!(listener.activation_count(), 0);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_outer_inactive_while_endpoint_down() {
        let bus = Arc::new(InMemoryEventBus::new());
        let listener = FakeListener::new(10_000);
        let endpoint = FakeEndpoint::new();
        let service = float(&listener, Some(Arc::clone(&endpoint)), &bus);

        service.start().await.unwrap();
        endpoint.set_ready(false);
        assert!(!service.active().is_active());

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_start_failure_is_reported() {
        let bus = Arc::new(InMemoryEventBus::new());
        let listener = FakeListener::new(10_000);
        listener.fail_start();
        let service = float(&listener, None, &bus);

        let err = service.start().await.unwrap_err();
        assert_eq!(err.service, ServiceId::FloatSupervisor);
        assert!(!service.active().is_active());

        // stop after a failed start is safe
        service.stop().await.unwrap();
    }
}
