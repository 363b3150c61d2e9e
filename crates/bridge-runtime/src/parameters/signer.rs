//! # Development Network Authority
//!
//! Generates a throwaway root → intermediate → parameters-signer hierarchy
//! and writes the artifacts a bridge expects in its base directory. Used by
//! the `bridge-bootstrap` binary and by tests. Production networks distribute
//! these artifacts out of band.

use std::path::Path;

use chrono::Utc;
use shared_crypto::{KeyPair, PublicKey, SignatureScheme};
use shared_types::{
    Certificate, CertificateRole, NetworkParameters, SignedNetworkParameters, TrustRoot,
};
use tracing::info;

use super::{ParameterError, CERTIFICATES_DIR, NETWORK_PARAMETERS_FILE, TRUST_STORE_FILE};
use crate::environment;

const ROOT_SUBJECT: &str = "CN=Dev Network Root";
const INTERMEDIATE_SUBJECT: &str = "CN=Dev Network Intermediate";
const SIGNER_SUBJECT: &str = "CN=Dev Network Parameters Signer";

/// A self-contained signing hierarchy for development networks.
pub struct DevNetworkAuthority {
    root: Certificate,
    intermediate_key: KeyPair,
    intermediate: Certificate,
    signer_key: KeyPair,
    signer: Certificate,
}

impl DevNetworkAuthority {
    /// Generate a fresh hierarchy with every key in `scheme`.
    #[must_use]
    pub fn generate(scheme: SignatureScheme) -> Self {
        let root_key = KeyPair::generate(scheme);
        let intermediate_key = KeyPair::generate(scheme);
        let signer_key = KeyPair::generate(scheme);

        let root = issue(
            ROOT_SUBJECT,
            CertificateRole::Root,
            &root_key.public_key(),
            ROOT_SUBJECT,
            &root_key,
        );
        let intermediate = issue(
            INTERMEDIATE_SUBJECT,
            CertificateRole::Intermediate,
            &intermediate_key.public_key(),
            ROOT_SUBJECT,
            &root_key,
        );
        let signer = issue(
            SIGNER_SUBJECT,
            CertificateRole::NetworkParameters,
            &signer_key.public_key(),
            INTERMEDIATE_SUBJECT,
            &intermediate_key,
        );

        Self {
            root,
            intermediate_key,
            intermediate,
            signer_key,
            signer,
        }
    }

    /// The root every bridge on this network must trust.
    #[must_use]
    pub fn trust_root(&self) -> TrustRoot {
        TrustRoot::new(self.root.clone())
    }

    /// Signer chain, leaf first.
    #[must_use]
    pub fn chain(&self) -> Vec<Certificate> {
        vec![self.signer.clone(), self.intermediate.clone()]
    }

    /// Public key of the parameters signer.
    #[must_use]
    pub fn signer_public_key(&self) -> PublicKey {
        self.signer_key.public_key()
    }

    /// Issue an extra leaf certificate from the intermediate, with any role.
    #[must_use]
    pub fn issue_leaf(&self, subject: &str, role: CertificateRole, key: &KeyPair) -> Certificate {
        issue(
            subject,
            role,
            &key.public_key(),
            INTERMEDIATE_SUBJECT,
            &self.intermediate_key,
        )
    }

    /// Sign `parameters` with the parameters signer.
    pub fn sign(
        &self,
        parameters: &NetworkParameters,
    ) -> Result<SignedNetworkParameters, ParameterError> {
        let raw = parameters
            .to_canonical_bytes()
            .map_err(|e| ParameterError::Malformed(e.to_string()))?;
        let signature = self.signer_key.sign(&raw);
        Ok(SignedNetworkParameters {
            raw,
            signature,
            certificate_chain: self.chain(),
        })
    }

    /// Encoded artifact, as it is stored on disk.
    pub fn signed_bytes(&self, parameters: &NetworkParameters) -> Result<Vec<u8>, ParameterError> {
        let signed = self.sign(parameters)?;
        Ok(environment::codec().encode("signed network parameters", &signed)?)
    }

    /// Write the trust store and the signed parameters under `base_directory`.
    pub fn write_artifacts(
        &self,
        base_directory: &Path,
        parameters: &NetworkParameters,
    ) -> Result<(), ParameterError> {
        let certificates = base_directory.join(CERTIFICATES_DIR);
        std::fs::create_dir_all(&certificates).map_err(|source| ParameterError::Io {
            path: certificates.clone(),
            source,
        })?;

        let trust_store = certificates.join(TRUST_STORE_FILE);
        let trust_bytes = environment::codec().encode("trust store", &self.trust_root())?;
        write(&trust_store, &trust_bytes)?;

        let parameters_path = base_directory.join(NETWORK_PARAMETERS_FILE);
        write(&parameters_path, &self.signed_bytes(parameters)?)?;

        info!(
            trust_store = %trust_store.display(),
            parameters = %parameters_path.display(),
            epoch = parameters.epoch,
            "Development network artifacts written"
        );
        Ok(())
    }

    /// Reasonable development parameters.
    #[must_use]
    pub fn default_parameters(
        max_message_size: u32,
        minimum_platform_version: u32,
    ) -> NetworkParameters {
        NetworkParameters {
            minimum_platform_version,
            max_message_size,
            max_transaction_size: max_message_size,
            epoch: 1,
            modified_time: Utc::now(),
            event_horizon_days: 30,
            notaries: Vec::new(),
            policy: Default::default(),
        }
    }
}

fn issue(
    subject: &str,
    role: CertificateRole,
    subject_key: &PublicKey,
    issuer: &str,
    issuer_key: &KeyPair,
) -> Certificate {
    let mut certificate = Certificate {
        subject: subject.to_string(),
        issuer: issuer.to_string(),
        role,
        scheme: subject_key.scheme(),
        public_key: subject_key.encoded(),
        signature: Vec::new(),
    };
    certificate.signature = issuer_key.sign(&certificate.to_be_signed());
    certificate
}

fn write(path: &Path, bytes: &[u8]) -> Result<(), ParameterError> {
    std::fs::write(path, bytes).map_err(|source| ParameterError::Io {
        path: path.to_path_buf(),
        source,
    })
}
