//! # Bridge Events
//!
//! Operational events published by the control plane and its services.

use serde::{Deserialize, Serialize};
use shared_types::{BridgeMode, ServiceId};

/// All events that can be published to the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeEvent {
    // =========================================================================
    // LIFECYCLE
    // =========================================================================
    /// Network parameters passed signature and version checks.
    ParametersVerified {
        /// Hex BLAKE3 hash of the signed bytes.
        hash: String,
        /// Parameter epoch.
        epoch: u32,
        /// Frame limit every framing service will use.
        max_message_size: u32,
    },

    /// A subservice finished `start()`.
    ServiceStarted {
        /// The service.
        service: ServiceId,
        /// Mode of the owning process.
        mode: BridgeMode,
    },

    /// A subservice finished `stop()`.
    ServiceStopped {
        /// The service.
        service: ServiceId,
    },

    // =========================================================================
    // HEALTH
    // =========================================================================
    /// A subservice's own active signal changed.
    ServiceActiveChanged {
        /// The service.
        service: ServiceId,
        /// New value.
        active: bool,
    },

    /// The aggregate active signal changed.
    BridgeActiveChanged {
        /// New value.
        active: bool,
    },

    // =========================================================================
    // NETWORK
    // =========================================================================
    /// The public listener was bound.
    ListenerActivated {
        /// Bound address.
        address: String,
        /// Identity whose keys were provisioned.
        identity: String,
    },

    /// The public listener was closed and its keys wiped.
    ListenerDeactivated {
        /// Address that was bound.
        address: String,
    },

    /// An inbound connection reached the public listener.
    ConnectionAccepted {
        /// Remote socket address.
        remote: String,
    },

    /// The message-queue connection came up.
    QueueConnected {
        /// Broker address.
        broker: String,
    },

    /// The message-queue connection went down.
    QueueDisconnected {
        /// Broker address.
        broker: String,
    },

    // =========================================================================
    // CONTROL
    // =========================================================================
    /// A control-channel command arrived at a float.
    ControlCommandReceived {
        /// Command name.
        command: String,
        /// Whether it was applied.
        accepted: bool,
    },

    // =========================================================================
    // CRITICAL
    // =========================================================================
    /// Failure requiring operator attention.
    CriticalError {
        /// Service that reported it.
        service: ServiceId,
        /// Error description.
        error: String,
    },
}

impl BridgeEvent {
    /// Topic used for filtering.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::ParametersVerified { .. }
            | Self::ServiceStarted { .. }
            | Self::ServiceStopped { .. } => EventTopic::Lifecycle,
            Self::ServiceActiveChanged { .. } | Self::BridgeActiveChanged { .. } => {
                EventTopic::Health
            }
            Self::ListenerActivated { .. }
            | Self::ListenerDeactivated { .. }
            | Self::ConnectionAccepted { .. }
            | Self::QueueConnected { .. }
            | Self::QueueDisconnected { .. } => EventTopic::Network,
            Self::ControlCommandReceived { .. } => EventTopic::Control,
            Self::CriticalError { .. } => EventTopic::Critical,
        }
    }
}

/// Event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Start/stop and bootstrap.
    Lifecycle,
    /// Active-signal changes.
    Health,
    /// Listener, connection and queue events.
    Network,
    /// Control-channel traffic.
    Control,
    /// Failures.
    Critical,
}

impl EventTopic {
    /// Label used in metrics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::Health => "health",
            Self::Network => "network",
            Self::Control => "control",
            Self::Critical => "critical",
        }
    }
}

/// Topic filter for subscriptions. An empty topic list matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Accepted topics.
    pub topics: Vec<EventTopic>,
}

impl EventFilter {
    /// Match every event.
    #[must_use]
    pub fn all() -> Self {
        Self { topics: Vec::new() }
    }

    /// Match only the given topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self { topics }
    }

    /// Whether `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &BridgeEvent) -> bool {
        self.topics.is_empty() || self.topics.contains(&event.topic())
    }
}
