//! # Parameter Verifier
//!
//! A validating transform: signed artifact bytes in, [`VerifiedNetworkParameters`]
//! out. Reads nothing but the artifacts it is handed and keeps no state.

use bridge_telemetry::{metric_inc, PARAMETER_VERIFICATIONS};
use shared_crypto::blake3_hash;
use shared_types::{NetworkParameters, SignedNetworkParameters, TrustRoot};
use tracing::{info, warn};

use super::chain::verify_chain;
use super::{NetworkParametersReader, ParameterError, TrustRootSource, VerifiedNetworkParameters};
use crate::environment;

/// Verifies signed network parameters against a trust root.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterVerifier;

impl ParameterVerifier {
    /// Create a verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Verify `signed_bytes` (an encoded `SignedNetworkParameters`).
    ///
    /// Checks run in order: chain, signature, structure, platform version.
    pub fn verify(
        &self,
        trust_root: &TrustRoot,
        signed_bytes: &[u8],
        local_platform_version: u32,
    ) -> Result<VerifiedNetworkParameters, ParameterError> {
        let result = verify_signed(trust_root, signed_bytes, local_platform_version);
        record(&result);
        result
    }

    /// Read the artifact and trust root, then [`Self::verify`].
    pub fn verify_from(
        &self,
        reader: &NetworkParametersReader,
        trust_roots: &dyn TrustRootSource,
        local_platform_version: u32,
    ) -> Result<VerifiedNetworkParameters, ParameterError> {
        let loaded = reader
            .read()
            .and_then(|bytes| trust_roots.load().map(|root| (root, bytes)));
        match loaded {
            Ok((root, bytes)) => self.verify(&root, &bytes, local_platform_version),
            Err(e) => {
                let result = Err(e);
                record(&result);
                result
            }
        }
    }
}

fn record(result: &Result<VerifiedNetworkParameters, ParameterError>) {
    match result {
        Ok(verified) => {
            metric_inc!(PARAMETER_VERIFICATIONS, &["verified"]);
            info!(
                epoch = verified.epoch(),
                max_message_size = verified.max_message_size(),
                signer = %verified.signer(),
                hash = %verified.hash_hex(),
                "Network parameters verified"
            );
        }
        Err(e) => {
            metric_inc!(PARAMETER_VERIFICATIONS, &[e.outcome()]);
            warn!(error = %e, "Network parameters rejected");
        }
    }
}

fn verify_signed(
    trust_root: &TrustRoot,
    signed_bytes: &[u8],
    local_platform_version: u32,
) -> Result<VerifiedNetworkParameters, ParameterError> {
    let codec = environment::codec();
    let signed: SignedNetworkParameters = codec.decode("signed network parameters", signed_bytes)?;

    let signer_key = verify_chain(trust_root, &signed.certificate_chain)?;
    let signer = signed
        .certificate_chain
        .first()
        .map(|leaf| leaf.subject.clone())
        .unwrap_or_default();
    signer_key
        .verify(&signed.raw, &signed.signature)
        .map_err(|_| {
            ParameterError::SignatureInvalid(format!(
                "parameters signature does not verify under {signer}"
            ))
        })?;

    let parameters: NetworkParameters = codec.decode("network parameters", &signed.raw)?;
    validate(&parameters)?;

    if parameters.minimum_platform_version > local_platform_version {
        return Err(ParameterError::VersionIncompatible {
            required: parameters.minimum_platform_version,
            local: local_platform_version,
        });
    }

    Ok(VerifiedNetworkParameters::new(
        parameters,
        blake3_hash(&signed.raw),
        signer,
    ))
}

fn validate(parameters: &NetworkParameters) -> Result<(), ParameterError> {
    let invalid = |reason: &str| Err(ParameterError::InvalidParameters(reason.to_string()));

    if parameters.minimum_platform_version < 1 {
        return invalid("minimum platform version must be at least 1");
    }
    if parameters.epoch < 1 {
        return invalid("epoch must be at least 1");
    }
    if parameters.max_message_size == 0 {
        return invalid("max message size must be positive");
    }
    if parameters.max_transaction_size == 0 {
        return invalid("max transaction size must be positive");
    }
    if parameters.max_transaction_size > parameters.max_message_size {
        return invalid("max transaction size exceeds max message size");
    }
    Ok(())
}
