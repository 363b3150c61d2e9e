//! # Network Parameter Bootstrap
//!
//! One-shot precondition check run by `Supervisor::start()` before any
//! network activity:
//!
//! 1. Read `<base>/network-parameters` (missing → `ConfigurationMissing`)
//! 2. Load the trust root from `<base>/certificates/network-root-truststore.json`
//! 3. Verify the signer's certificate chain up to the trust root, then the
//!    parameters signature under the leaf key (→ `SignatureInvalid`)
//! 4. Check the declared minimum platform version (→ `VersionIncompatible`)
//!
//! No retries and no partial state: a failure aborts startup.

mod chain;
mod reader;
mod signer;
mod verified;
mod verifier;

use std::path::PathBuf;

use thiserror::Error;

use crate::environment::CodecError;

pub use reader::{FileTrustRootSource, NetworkParametersReader, StaticTrustRoot, TrustRootSource};
pub use signer::DevNetworkAuthority;
pub use verified::VerifiedNetworkParameters;
pub use verifier::ParameterVerifier;

/// File name of the signed parameters artifact under the base directory.
pub const NETWORK_PARAMETERS_FILE: &str = "network-parameters";

/// Directory holding trust and key stores under the base directory.
pub const CERTIFICATES_DIR: &str = "certificates";

/// File name of the trust store under [`CERTIFICATES_DIR`].
pub const TRUST_STORE_FILE: &str = "network-root-truststore.json";

/// Longest certificate chain accepted, leaf included.
pub const MAX_CHAIN_LENGTH: usize = 8;

/// Network parameter bootstrap errors.
#[derive(Debug, Error)]
pub enum ParameterError {
    /// No parameters artifact at the expected location.
    #[error("Network parameters not found at {0}")]
    ConfigurationMissing(PathBuf),

    /// No trust store at the expected location.
    #[error("Trust store not found at {0}")]
    TrustStoreMissing(PathBuf),

    /// Reading an artifact failed for a reason other than absence.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An artifact could not be decoded.
    #[error("Malformed artifact: {0}")]
    Malformed(String),

    /// The certificate chain or the parameters signature did not verify.
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// The network requires a newer platform than this process.
    #[error("Network requires platform version {required}, local version is {local}")]
    VersionIncompatible {
        /// Minimum declared by the parameters.
        required: u32,
        /// This process's platform version.
        local: u32,
    },

    /// Signed, but structurally unusable.
    #[error("Invalid network parameters: {0}")]
    InvalidParameters(String),
}

impl ParameterError {
    /// Outcome label for metrics.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::ConfigurationMissing(_) => "configuration_missing",
            Self::TrustStoreMissing(_) => "trust_store_missing",
            Self::Io { .. } => "io_error",
            Self::Malformed(_) => "malformed",
            Self::SignatureInvalid(_) => "signature_invalid",
            Self::VersionIncompatible { .. } => "version_incompatible",
            Self::InvalidParameters(_) => "invalid_parameters",
        }
    }
}

impl From<CodecError> for ParameterError {
    fn from(err: CodecError) -> Self {
        Self::Malformed(err.to_string())
    }
}
