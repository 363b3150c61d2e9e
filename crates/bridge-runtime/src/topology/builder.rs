//! # Topology Builder
//!
//! Constructs the services for a mode from one set of verified parameters.
//! The frame limit handed to every collaborator comes from that single value,
//! so float and bridge cannot disagree on it.

use std::sync::Arc;
use std::time::Duration;

use shared_bus::InMemoryEventBus;
use shared_types::{BridgeMode, ServiceId};
use tracing::{debug, info};

use super::{Topology, TopologyError};
use crate::parameters::VerifiedNetworkParameters;
use crate::ports::CollaboratorFactory;
use crate::services::{
    ActivationTarget, AuditService, BridgeSupervisorService, FloatSupervisorService,
};

/// Default interval between listener activation retries.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Builds a [`Topology`] for a mode.
pub struct TopologyBuilder {
    factory: Arc<dyn CollaboratorFactory>,
    bus: Arc<InMemoryEventBus>,
    retry_interval: Duration,
}

impl TopologyBuilder {
    /// Builder creating collaborators through `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn CollaboratorFactory>, bus: Arc<InMemoryEventBus>) -> Self {
        Self {
            factory,
            bus,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Set the bridge's activation retry interval.
    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Build the topology for `mode`.
    ///
    /// The float is always constructed before the bridge.
    pub fn build(
        &self,
        mode: BridgeMode,
        parameters: &VerifiedNetworkParameters,
        audit: Arc<AuditService>,
    ) -> Result<Topology, TopologyError> {
        let mut assembly = TopologyAssembly::new(self, mode, parameters, audit);
        if mode.has_float() {
            assembly.add_float()?;
        }
        if mode.has_bridge() {
            assembly.add_bridge()?;
        }
        let topology = assembly.finish()?;

        info!(
            mode = %mode,
            services = ?topology.service_ids(),
            max_message_size = parameters.max_message_size(),
            "Topology built"
        );
        Ok(topology)
    }
}

/// A topology under construction. Enforces mode rules and construction order.
pub(crate) struct TopologyAssembly<'a> {
    builder: &'a TopologyBuilder,
    mode: BridgeMode,
    parameters: &'a VerifiedNetworkParameters,
    audit: Arc<AuditService>,
    float: Option<Arc<FloatSupervisorService>>,
    bridge: Option<Arc<BridgeSupervisorService>>,
}

impl<'a> TopologyAssembly<'a> {
    pub(crate) fn new(
        builder: &'a TopologyBuilder,
        mode: BridgeMode,
        parameters: &'a VerifiedNetworkParameters,
        audit: Arc<AuditService>,
    ) -> Self {
        Self {
            builder,
            mode,
            parameters,
            audit,
            float: None,
            bridge: None,
        }
    }

    pub(crate) fn add_float(&mut self) -> Result<(), TopologyError> {
        let service = ServiceId::FloatSupervisor;
        if !self.mode.has_float() {
            return Err(TopologyError::ServiceNotAllowed {
                mode: self.mode,
                service,
            });
        }
        if self.float.is_some() {
            return Err(TopologyError::DuplicateService(service));
        }

        let factory = &self.builder.factory;
        let listener = factory.listener(self.parameters.max_message_size());
        let endpoint = match self.mode {
            BridgeMode::FloatOuter => Some(factory.control_endpoint()),
            _ => None,
        };
        debug!(remote_activation = endpoint.is_some(), "Constructing float");

        self.float = Some(Arc::new(FloatSupervisorService::new(
            self.mode,
            self.parameters,
            listener,
            endpoint,
            Arc::clone(&self.builder.bus),
        )));
        Ok(())
    }

    pub(crate) fn add_bridge(&mut self) -> Result<(), TopologyError> {
        let service = ServiceId::BridgeSupervisor;
        if !self.mode.has_bridge() {
            return Err(TopologyError::ServiceNotAllowed {
                mode: self.mode,
                service,
            });
        }
        if self.bridge.is_some() {
            return Err(TopologyError::DuplicateService(service));
        }

        let factory = &self.builder.factory;
        let target = if self.mode.has_float() {
            let float = self
                .float
                .as_ref()
                .ok_or(TopologyError::BridgeBeforeFloat(self.mode))?;
            ActivationTarget::Local(float.listener_control())
        } else {
            ActivationTarget::Remote(factory.control_tunnel())
        };
        debug!(local = self.mode.has_float(), "Constructing bridge");

        self.bridge = Some(Arc::new(BridgeSupervisorService::new(
            self.mode,
            self.parameters,
            factory.queue_connector(self.parameters.max_message_size()),
            target,
            factory.key_material(),
            Arc::clone(&self.builder.bus),
            self.builder.retry_interval,
        )));
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<Topology, TopologyError> {
        let missing = |service| TopologyError::MissingService {
            mode: self.mode,
            service,
        };
        if self.mode.has_float() && self.float.is_none() {
            return Err(missing(ServiceId::FloatSupervisor));
        }
        if self.mode.has_bridge() && self.bridge.is_none() {
            return Err(missing(ServiceId::BridgeSupervisor));
        }

        Ok(Topology {
            mode: self.mode,
            parameters: self.parameters.clone(),
            audit: self.audit,
            float: self.float,
            bridge: self.bridge,
        })
    }
}
