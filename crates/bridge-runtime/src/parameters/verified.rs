//! The only way network parameters reach the rest of the runtime.

use std::sync::Arc;

use shared_crypto::Hash;
use shared_types::NetworkParameters;

/// Network parameters that passed chain, signature, structure and version
/// checks.
///
/// Fields are private and the constructor is crate-private, so holding a value
/// of this type is proof the checks ran. Clones share one parameter set.
#[derive(Debug, Clone)]
pub struct VerifiedNetworkParameters {
    parameters: Arc<NetworkParameters>,
    hash: Hash,
    signer: String,
}

impl VerifiedNetworkParameters {
    pub(crate) fn new(parameters: NetworkParameters, hash: Hash, signer: String) -> Self {
        Self {
            parameters: Arc::new(parameters),
            hash,
            signer,
        }
    }

    /// The verified parameters.
    #[must_use]
    pub fn parameters(&self) -> &NetworkParameters {
        &self.parameters
    }

    /// Frame limit for every framing service.
    #[must_use]
    pub fn max_message_size(&self) -> u32 {
        self.parameters.max_message_size
    }

    /// Parameter epoch.
    #[must_use]
    pub fn epoch(&self) -> u32 {
        self.parameters.epoch
    }

    /// Minimum platform version declared by the network.
    #[must_use]
    pub fn minimum_platform_version(&self) -> u32 {
        self.parameters.minimum_platform_version
    }

    /// BLAKE3 hash of the signed bytes.
    #[must_use]
    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    /// Hex form of [`Self::hash`].
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Subject of the certificate that signed the parameters.
    #[must_use]
    pub fn signer(&self) -> &str {
        &self.signer
    }
}
