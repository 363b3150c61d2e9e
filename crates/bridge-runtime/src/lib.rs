//! # Bridge Runtime Library
//!
//! The supervisory control plane of the float bridge. The binaries in this
//! crate (`bridge-runtime`, `bridge-bootstrap`) are thin wrappers around it.
//!
//! ## Startup
//!
//! ```text
//! Supervisor::start()
//!   ├─ environment::init()              process-wide, once
//!   ├─ register termination hook
//!   ├─ ParameterVerifier                 trust root + signed parameters
//!   ├─ TopologyBuilder                   mode → audit, float?, bridge?
//!   ├─ StateAggregator                   all services → bridge active
//!   └─ start audit, float, bridge        stop runs in reverse
//! ```
//!
//! ## Architectural Patterns
//!
//! - **Hexagonal Architecture**: `ports` define the collaborators the control
//!   plane drives, `adapters` implement them over TCP and the filesystem
//! - **Split trust**: the topology for each mode only holds the capabilities
//!   that mode is allowed to hold

#![warn(missing_docs)]
#![allow(clippy::type_complexity)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod container;
pub mod environment;
pub mod health;
pub mod parameters;
pub mod ports;
pub mod registry;
pub mod services;
pub mod supervisor;
pub mod topology;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use container::{BridgeConfig, ConfigError, PLATFORM_VERSION};
pub use health::{AggregateSubscription, AggregatorError, EmptySetPolicy, StateAggregator};
pub use parameters::{ParameterError, ParameterVerifier, VerifiedNetworkParameters};
pub use registry::{Subservice, SubserviceError};
pub use supervisor::{
    ExitSignal, ExitStatus, LifecycleState, StopReason, Supervisor, SupervisorError,
};
pub use topology::{Topology, TopologyBuilder, TopologyError};
