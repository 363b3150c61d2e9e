//! Artifact loading from the base directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use shared_types::TrustRoot;

use super::{ParameterError, CERTIFICATES_DIR, NETWORK_PARAMETERS_FILE, TRUST_STORE_FILE};
use crate::environment;

/// Reads the signed network parameters artifact.
#[derive(Debug, Clone)]
pub struct NetworkParametersReader {
    path: PathBuf,
}

impl NetworkParametersReader {
    /// Reader for `<base_directory>/network-parameters`.
    pub fn new(base_directory: impl AsRef<Path>) -> Self {
        Self {
            path: base_directory.as_ref().join(NETWORK_PARAMETERS_FILE),
        }
    }

    /// Artifact path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw artifact bytes.
    pub fn read(&self) -> Result<Vec<u8>, ParameterError> {
        read_artifact(&self.path).map_err(|e| match e {
            ReadFailure::Missing => ParameterError::ConfigurationMissing(self.path.clone()),
            ReadFailure::Other(e) => e,
        })
    }
}

/// Loader for the locally trusted network root.
pub trait TrustRootSource: Send + Sync {
    /// Load the trust root.
    fn load(&self) -> Result<TrustRoot, ParameterError>;
}

/// Trust root stored as JSON under `<base>/certificates/`.
#[derive(Debug, Clone)]
pub struct FileTrustRootSource {
    path: PathBuf,
}

impl FileTrustRootSource {
    /// Source for `<base_directory>/certificates/network-root-truststore.json`.
    pub fn new(base_directory: impl AsRef<Path>) -> Self {
        Self {
            path: base_directory
                .as_ref()
                .join(CERTIFICATES_DIR)
                .join(TRUST_STORE_FILE),
        }
    }

    /// Trust store path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrustRootSource for FileTrustRootSource {
    fn load(&self) -> Result<TrustRoot, ParameterError> {
        let bytes = read_artifact(&self.path).map_err(|e| match e {
            ReadFailure::Missing => ParameterError::TrustStoreMissing(self.path.clone()),
            ReadFailure::Other(e) => e,
        })?;
        Ok(environment::codec().decode("trust store", &bytes)?)
    }
}

/// A trust root held in memory.
#[derive(Debug, Clone)]
pub struct StaticTrustRoot(pub TrustRoot);

impl TrustRootSource for StaticTrustRoot {
    fn load(&self) -> Result<TrustRoot, ParameterError> {
        Ok(self.0.clone())
    }
}

enum ReadFailure {
    Missing,
    Other(ParameterError),
}

fn read_artifact(path: &Path) -> Result<Vec<u8>, ReadFailure> {
    let limit = environment::codec().max_artifact_size();
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > limit as u64 => {
            return Err(ReadFailure::Other(ParameterError::Malformed(format!(
                "{} is {} bytes, limit is {}",
                path.display(),
                meta.len(),
                limit
            ))))
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(ReadFailure::Missing),
        Err(source) => {
            return Err(ReadFailure::Other(ParameterError::Io {
                path: path.to_path_buf(),
                source,
            }))
        }
    }

    std::fs::read(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            ReadFailure::Missing
        } else {
            ReadFailure::Other(ParameterError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    })
}
