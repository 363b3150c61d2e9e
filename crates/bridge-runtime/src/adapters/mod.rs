//! # Adapter Implementations
//!
//! Concrete implementations of the collaborator ports over TCP, the
//! filesystem and OS signals, plus the admin HTTP endpoint.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ OUTER LAYER (Adapters)                                        │
//! │   TcpListenerService, TcpQueueConnector, TcpControlTunnel,    │
//! │   TcpControlEndpoint, FileKeyMaterialSource, OsTermination    │
//! └──────────────────────────────────────────────────────────────┘
//!                           ↑ implements ↑
//! ┌──────────────────────────────────────────────────────────────┐
//! │ MIDDLE LAYER (crate::ports)                                   │
//! │   Lifecycle, ListenerControl, QueueConnector, ControlTunnel,  │
//! │   ControlEndpoint, KeyMaterialSource, TerminationSignal       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod admin;
pub mod control;
pub mod factory;
pub mod keys;
pub mod listener;
pub mod queue;
pub mod termination;

pub use admin::{admin_router, serve_admin, PROMETHEUS_CONTENT_TYPE};
pub use control::{TcpControlEndpoint, TcpControlTunnel, MAX_COMMAND_LINE};
pub use factory::TcpCollaborators;
pub use keys::{generate_dev_keys, write_key_material, FileKeyMaterialSource};
pub use listener::TcpListenerService;
pub use queue::TcpQueueConnector;
pub use termination::OsTermination;
