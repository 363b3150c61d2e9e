//! # Control Channel Commands
//!
//! Commands a bridge controller (FloatInner) sends to a remote float
//! (FloatOuter). The float holds no long-lived keys of its own: it receives
//! TLS key material with each activation and discards it on deactivation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use shared_crypto::fingerprint;

/// TLS key material handed to a listener on activation.
///
/// The store contents are opaque to the control plane; only the transport
/// layer interprets them.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    /// Legal identity the keys belong to.
    pub identity: String,
    /// Encoded key store.
    #[serde_as(as = "Hex")]
    pub keystore: Vec<u8>,
    /// Encoded trust store.
    #[serde_as(as = "Hex")]
    pub truststore: Vec<u8>,
}

impl KeyMaterial {
    /// Short fingerprint of the key store, safe to log.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.keystore)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("identity", &self.identity)
            .field("keystore", &self.fingerprint())
            .field("truststore_len", &self.truststore.len())
            .finish()
    }
}

/// Command sent over the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Provision keys and open the public listener.
    Activate {
        /// Frame limit the controller verified; must match the float's own.
        max_message_size: u32,
        /// Hex hash of the controller's verified network parameters.
        parameters_hash: String,
        /// Key material for the listener.
        keys: KeyMaterial,
    },
    /// Close the public listener and wipe keys.
    Deactivate,
}

impl ControlCommand {
    /// Command name for logs and audit records.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Activate { .. } => "activate",
            Self::Deactivate => "deactivate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_does_not_leak_keystore() {
        let keys = KeyMaterial {
            identity: "O=Bank".to_string(),
            keystore: vec![0xAA; 16],
            truststore: vec![0xBB; 8],
        };
        let debug = format!("{:?}", keys);
        assert!(!debug.contains("[170, 170"));
        assert!(!debug.contains(&"aa".repeat(16)));
        assert!(debug.contains(&keys.fingerprint()));
    }

    #[test]
    fn test_command_wire_shape() {
        let json = serde_json::to_value(ControlCommand::Deactivate).unwrap();
        assert_eq!(json, serde_json::json!({ "command": "deactivate" }));
    }
}
