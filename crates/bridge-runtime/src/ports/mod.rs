//! # Collaborator Ports
//!
//! The control plane supervises transport components it does not implement.
//! These traits are the contracts it drives them through; `crate::adapters`
//! holds the TCP/filesystem implementations and `crate::testing` the
//! in-memory doubles.
//!
//! ```text
//! ┌────────────────────┐        ┌──────────────────────────────────┐
//! │ FloatSupervisor    │ owns   │ Lifecycle + ListenerControl       │
//! │                    │───────►│ ControlEndpoint (FloatOuter)      │
//! └────────────────────┘        └──────────────────────────────────┘
//! ┌────────────────────┐        ┌──────────────────────────────────┐
//! │ BridgeSupervisor   │ owns   │ QueueConnector                    │
//! │                    │───────►│ ControlTunnel (FloatInner)        │
//! │                    │ weak   │ ListenerControl (SenderReceiver)  │
//! └────────────────────┘        └──────────────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use shared_bus::ActiveSignal;
use shared_types::{ControlCommand, KeyMaterial};
use thiserror::Error;
use tokio::sync::watch;

use crate::parameters::TrustRootSource;

/// Transport-level failures reported by collaborators.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A control message could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The component has not been started (or was stopped).
    #[error("{0} is not started")]
    NotStarted(String),

    /// No peer is connected.
    #[error("{0} is not connected")]
    NotConnected(String),

    /// The capability this call needed has been released by its owner.
    #[error("{0} is no longer available")]
    Released(String),

    /// Key material could not be loaded.
    #[error("Key material unavailable: {0}")]
    KeyMaterial(String),
}

/// Start/stop contract shared by every supervised transport component.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Component name for logs.
    fn name(&self) -> &str;

    /// Start the component.
    async fn start(&self) -> Result<(), TransportError>;

    /// Stop the component. Idempotent, and safe after a failed start.
    async fn stop(&self);

    /// Readiness of the component.
    fn active(&self) -> ActiveSignal;
}

/// Control over the public inbound listener.
///
/// The float owns the listener. A co-located bridge holds this capability
/// only through a `Weak` reference.
#[async_trait]
pub trait ListenerControl: Send + Sync {
    /// Provision TLS keys and open the public socket.
    ///
    /// Activating an already-open listener replaces its keys.
    async fn activate(&self, keys: KeyMaterial) -> Result<(), TransportError>;

    /// Close the public socket and wipe the keys. Idempotent.
    async fn deactivate(&self) -> Result<(), TransportError>;

    /// True while the public socket is open.
    fn listening(&self) -> ActiveSignal;

    /// Frame limit the listener enforces.
    fn max_message_size(&self) -> u32;

    /// Configured (or bound) listen address.
    fn address(&self) -> String;
}

/// The float's listener, as both a lifecycle component and a control handle.
///
/// Factories return both views of one object so callers never need to
/// convert between trait objects.
#[derive(Clone)]
pub struct ListenerParts {
    /// Lifecycle view.
    pub service: Arc<dyn Lifecycle>,
    /// Control view.
    pub control: Arc<dyn ListenerControl>,
}

/// Connection to the message broker. `active()` is true while connected.
pub trait QueueConnector: Lifecycle {
    /// Broker address.
    fn broker(&self) -> String;

    /// Frame limit used on the broker connection.
    fn max_message_size(&self) -> u32;
}

/// Outbound control channel from a bridge controller to its float.
///
/// `active()` is true while the float is reachable.
#[async_trait]
pub trait ControlTunnel: Lifecycle {
    /// Send a command to the float.
    async fn send(&self, command: ControlCommand) -> Result<(), TransportError>;

    /// Number of connections established so far.
    ///
    /// A float drops its activation when its controller connection ends, so
    /// every new value needs a fresh `Activate` even if `active()` never
    /// looked false in between.
    fn sessions(&self) -> watch::Receiver<u64>;
}

/// Inbound control channel on a float. `active()` is true while accepting.
#[async_trait]
pub trait ControlEndpoint: Lifecycle {
    /// Wait for the next command from a controller.
    ///
    /// Returns `None` once the endpoint can deliver no more commands.
    async fn next_command(&self) -> Option<ControlCommand>;
}

/// Source of the TLS key material a bridge hands to its listener.
#[async_trait]
pub trait KeyMaterialSource: Send + Sync {
    /// Load the current key material.
    async fn load(&self) -> Result<KeyMaterial, TransportError>;
}

/// External termination request (OS signal, orchestrator).
#[async_trait]
pub trait TerminationSignal: Send + Sync {
    /// Resolve when termination is requested, naming the cause.
    async fn triggered(&self) -> std::io::Result<&'static str>;
}

/// Constructs the collaborators for one supervisor.
///
/// Every frame-handling collaborator receives its `max_message_size` from the
/// verified network parameters at construction.
pub trait CollaboratorFactory: Send + Sync {
    /// Public listener for a float.
    fn listener(&self, max_message_size: u32) -> ListenerParts;

    /// Broker connection for a bridge.
    fn queue_connector(&self, max_message_size: u32) -> Arc<dyn QueueConnector>;

    /// Control tunnel for a bridge controller (FloatInner).
    fn control_tunnel(&self) -> Arc<dyn ControlTunnel>;

    /// Control endpoint for a remotely activated float (FloatOuter).
    fn control_endpoint(&self) -> Arc<dyn ControlEndpoint>;

    /// Key material for listener activation.
    fn key_material(&self) -> Arc<dyn KeyMaterialSource>;

    /// Loader for the locally trusted network root.
    fn trust_roots(&self) -> Arc<dyn TrustRootSource>;

    /// Termination hook source.
    fn termination(&self) -> Arc<dyn TerminationSignal>;
}
