//! # Topology
//!
//! The mode decides which services a process may hold:
//!
//! | Mode | Float | Bridge | Bridge activates |
//! |------|-------|--------|------------------|
//! | `SenderReceiver` | yes | yes | the float's listener, through a `Weak` handle |
//! | `FloatInner` | no | yes | a remote float, over the control tunnel |
//! | `FloatOuter` | yes | no | (activated remotely over the control endpoint) |
//!
//! Audit is present in every mode. Start order is audit, float, bridge;
//! stop order is the reverse.

mod builder;

use std::sync::Arc;

use shared_types::{BridgeMode, ServiceId};
use thiserror::Error;

use crate::parameters::VerifiedNetworkParameters;
use crate::registry::Subservice;
use crate::services::{AuditService, BridgeSupervisorService, FloatSupervisorService};

pub use builder::{TopologyBuilder, DEFAULT_RETRY_INTERVAL};

/// Wiring errors. Each one is a programming error in topology assembly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// A co-located bridge was requested before its float existed.
    #[error("{0} bridge must be constructed after its float")]
    BridgeBeforeFloat(BridgeMode),

    /// The mode forbids this service.
    #[error("{mode} does not allow {service}")]
    ServiceNotAllowed {
        /// Process mode.
        mode: BridgeMode,
        /// Rejected service.
        service: ServiceId,
    },

    /// The same service was added twice.
    #[error("{0} already constructed")]
    DuplicateService(ServiceId),

    /// The mode requires a service that was never added.
    #[error("{mode} requires {service}")]
    MissingService {
        /// Process mode.
        mode: BridgeMode,
        /// Missing service.
        service: ServiceId,
    },
}

/// The services of one process, wired for its mode.
///
/// Built once per start and discarded on stop.
pub struct Topology {
    mode: BridgeMode,
    parameters: VerifiedNetworkParameters,
    audit: Arc<AuditService>,
    float: Option<Arc<FloatSupervisorService>>,
    bridge: Option<Arc<BridgeSupervisorService>>,
}

impl Topology {
    /// Process mode.
    #[must_use]
    pub fn mode(&self) -> BridgeMode {
        self.mode
    }

    /// Parameters every service was built from.
    #[must_use]
    pub fn parameters(&self) -> &VerifiedNetworkParameters {
        &self.parameters
    }

    /// The audit service.
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditService> {
        &self.audit
    }

    /// The float service, if the mode has one.
    #[must_use]
    pub fn float(&self) -> Option<&Arc<FloatSupervisorService>> {
        self.float.as_ref()
    }

    /// The bridge service, if the mode has one.
    #[must_use]
    pub fn bridge(&self) -> Option<&Arc<BridgeSupervisorService>> {
        self.bridge.as_ref()
    }

    /// Every service, in start order.
    #[must_use]
    pub fn services(&self) -> Vec<Arc<dyn Subservice>> {
        let mut services: Vec<Arc<dyn Subservice>> = vec![Arc::clone(&self.audit) as _];
        services.extend(self.domain_services());
        services
    }

    /// Float and bridge services, in start order.
    #[must_use]
    pub fn domain_services(&self) -> Vec<Arc<dyn Subservice>> {
        let mut services: Vec<Arc<dyn Subservice>> = Vec::with_capacity(2);
        if let Some(float) = &self.float {
            services.push(Arc::clone(float) as _);
        }
        if let Some(bridge) = &self.bridge {
            services.push(Arc::clone(bridge) as _);
        }
        services
    }

    /// Service identifiers, in start order.
    #[must_use]
    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.services().iter().map(|s| s.id()).collect()
    }
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("mode", &self.mode)
            .field("services", &self.service_ids())
            .field("max_message_size", &self.parameters.max_message_size())
            .finish()
    }
}
