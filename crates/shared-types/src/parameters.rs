//! # Network Parameters
//!
//! Network-wide policy every participant must agree on, distributed as a
//! signed artifact and accepted only after chain verification.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};

use crate::certificates::Certificate;
use crate::errors::TypeError;

/// A notary advertised by the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotaryInfo {
    /// Notary identity name.
    pub identity: String,
    /// Whether the notary validates transaction contents.
    pub validating: bool,
}

/// Network-wide operational limits and policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkParameters {
    /// Lowest platform version allowed to join.
    pub minimum_platform_version: u32,
    /// Largest AMQP frame any participant may send or accept, in bytes.
    pub max_message_size: u32,
    /// Largest transaction, in bytes. Never above `max_message_size`.
    pub max_transaction_size: u32,
    /// Monotonic parameter version.
    pub epoch: u32,
    /// When this version was issued.
    pub modified_time: DateTime<Utc>,
    /// How long a node may be offline before it is evicted, in days.
    pub event_horizon_days: u32,
    /// Notaries on the network.
    #[serde(default)]
    pub notaries: Vec<NotaryInfo>,
    /// Any further policy fields, carried through unchanged.
    #[serde(flatten)]
    pub policy: BTreeMap<String, serde_json::Value>,
}

impl NetworkParameters {
    /// Canonical encoding: the bytes that get signed.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, TypeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Signed parameters artifact as stored on disk.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedNetworkParameters {
    /// Canonical bytes of a [`NetworkParameters`].
    #[serde_as(as = "Hex")]
    pub raw: Vec<u8>,
    /// Signature over `raw` by the leaf of `certificate_chain`.
    #[serde_as(as = "Hex")]
    pub signature: Vec<u8>,
    /// Signer chain, leaf first, last entry issued by the trust root.
    pub certificate_chain: Vec<Certificate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NetworkParameters {
        let mut policy = BTreeMap::new();
        policy.insert("package_owner".to_string(), serde_json::json!("O=Bank"));
        NetworkParameters {
            minimum_platform_version: 4,
            max_message_size: 10_485_760,
            max_transaction_size: 524_288,
            epoch: 2,
            modified_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            event_horizon_days: 30,
            notaries: vec![NotaryInfo {
                identity: "O=Notary".to_string(),
                validating: false,
            }],
            policy,
        }
    }

    #[test]
    fn test_canonical_bytes_are_stable() {
        let params = sample();
        assert_eq!(
            params.to_canonical_bytes().unwrap(),
            params.clone().to_canonical_bytes().unwrap()
        );
    }

    #[test]
    fn test_unknown_fields_are_preserved() {
        let bytes = sample().to_canonical_bytes().unwrap();
        let decoded: NetworkParameters = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.policy["package_owner"], "O=Bank");
        assert_eq!(decoded, sample());
    }
}
