//! # Bridge Modes and Service Identifiers
//!
//! The deployment mode decides which subservices a process may hold.
//!
//! | Mode | Float | Bridge | Trust |
//! |------|-------|--------|-------|
//! | `SenderReceiver` | yes | yes | one process, both roles |
//! | `FloatInner` | no | yes | holds signing keys, never listens publicly |
//! | `FloatOuter` | yes | no | listens publicly, holds no long-lived keys |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::TypeError;

/// Deployment topology of a bridge process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeMode {
    /// Float and bridge in one process.
    SenderReceiver,
    /// Bridge controller: bridge only, drives a remote float over the control channel.
    FloatInner,
    /// Public-facing float only, activated by a remote bridge controller.
    FloatOuter,
}

impl BridgeMode {
    /// Every mode, in declaration order.
    pub const ALL: [BridgeMode; 3] = [Self::SenderReceiver, Self::FloatInner, Self::FloatOuter];

    /// Canonical name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SenderReceiver => "SenderReceiver",
            Self::FloatInner => "FloatInner",
            Self::FloatOuter => "FloatOuter",
        }
    }

    /// Whether this mode runs a float (public listener) in-process.
    #[must_use]
    pub fn has_float(&self) -> bool {
        matches!(self, Self::SenderReceiver | Self::FloatOuter)
    }

    /// Whether this mode runs a bridge (queue side, signing keys) in-process.
    #[must_use]
    pub fn has_bridge(&self) -> bool {
        matches!(self, Self::SenderReceiver | Self::FloatInner)
    }
}

impl fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BridgeMode {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "senderreceiver" => Ok(Self::SenderReceiver),
            "floatinner" | "bridgecontroller" => Ok(Self::FloatInner),
            "floatouter" => Ok(Self::FloatOuter),
            _ => Err(TypeError::UnknownMode(s.to_string())),
        }
    }
}

/// Subservices supervised by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceId {
    /// Operational event recorder. Started first, stopped last.
    Audit,
    /// Float supervisor: public listener and its control endpoint.
    FloatSupervisor,
    /// Bridge supervisor: message-queue side and listener activation.
    BridgeSupervisor,
}

impl ServiceId {
    /// Service name used in logs and metric labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Audit => "audit",
            Self::FloatSupervisor => "float-supervisor",
            Self::BridgeSupervisor => "bridge-supervisor",
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
