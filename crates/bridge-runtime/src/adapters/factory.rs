//! Production collaborator factory.

use std::sync::Arc;

use shared_bus::InMemoryEventBus;

use super::{
    FileKeyMaterialSource, OsTermination, TcpControlEndpoint, TcpControlTunnel,
    TcpListenerService, TcpQueueConnector,
};
use crate::container::BridgeConfig;
use crate::parameters::{FileTrustRootSource, TrustRootSource};
use crate::ports::{
    CollaboratorFactory, ControlEndpoint, ControlTunnel, KeyMaterialSource, ListenerParts,
    QueueConnector, TerminationSignal,
};

/// Builds TCP and filesystem collaborators from a [`BridgeConfig`].
pub struct TcpCollaborators {
    config: BridgeConfig,
    bus: Arc<InMemoryEventBus>,
}

impl TcpCollaborators {
    /// Factory for `config`. Listeners publish on `bus`.
    #[must_use]
    pub fn new(config: BridgeConfig, bus: Arc<InMemoryEventBus>) -> Arc<Self> {
        Arc::new(Self { config, bus })
    }
}

impl CollaboratorFactory for TcpCollaborators {
    fn listener(&self, max_message_size: u32) -> ListenerParts {
        TcpListenerService::new(
            self.config.network.listen_address.clone(),
            max_message_size,
            Arc::clone(&self.bus),
        )
        .parts()
    }

    fn queue_connector(&self, max_message_size: u32) -> Arc<dyn QueueConnector> {
        TcpQueueConnector::new(
            self.config.network.broker_address.clone(),
            max_message_size,
            self.config.network.reconnect_interval(),
        )
    }

    fn control_tunnel(&self) -> Arc<dyn ControlTunnel> {
        TcpControlTunnel::new(
            self.config.network.control_address.clone(),
            self.config.network.reconnect_interval(),
        )
    }

    fn control_endpoint(&self) -> Arc<dyn ControlEndpoint> {
        TcpControlEndpoint::new(self.config.network.control_address.clone())
    }

    fn key_material(&self) -> Arc<dyn KeyMaterialSource> {
        Arc::new(FileKeyMaterialSource::new(self.config.key_material_path()))
    }

    fn trust_roots(&self) -> Arc<dyn TrustRootSource> {
        Arc::new(FileTrustRootSource::new(&self.config.base_directory))
    }

    fn termination(&self) -> Arc<dyn TerminationSignal> {
        Arc::new(OsTermination)
    }
}
