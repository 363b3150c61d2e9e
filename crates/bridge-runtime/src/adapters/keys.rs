//! Key material stored as JSON under `<base>/certificates/bridge-keys.json`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::RngCore;
use shared_types::KeyMaterial;
use tracing::{debug, info};

use crate::environment;
use crate::ports::{KeyMaterialSource, TransportError};

/// Loads key material from a file on every activation.
#[derive(Debug, Clone)]
pub struct FileKeyMaterialSource {
    path: PathBuf,
}

impl FileKeyMaterialSource {
    /// Source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyMaterialSource for FileKeyMaterialSource {
    async fn load(&self) -> Result<KeyMaterial, TransportError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            TransportError::KeyMaterial(format!("{}: {e}", self.path.display()))
        })?;
        let keys: KeyMaterial = environment::codec()
            .decode("key material", &bytes)
            .map_err(|e| TransportError::KeyMaterial(e.to_string()))?;
        debug!(identity = %keys.identity, keys = %keys.fingerprint(), "Key material loaded");
        Ok(keys)
    }
}

/// Random key material for development deployments.
#[must_use]
pub fn generate_dev_keys(identity: &str) -> KeyMaterial {
    let mut rng = rand::thread_rng();
    let mut keystore = vec![0u8; 64];
    let mut truststore = vec![0u8; 32];
    rng.fill_bytes(&mut keystore);
    rng.fill_bytes(&mut truststore);
    KeyMaterial {
        identity: identity.to_string(),
        keystore,
        truststore,
    }
}

/// Write `keys` to `path`, creating parent directories.
pub fn write_key_material(path: &Path, keys: &KeyMaterial) -> Result<(), TransportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = environment::codec()
        .encode("key material", keys)
        .map_err(|e| TransportError::KeyMaterial(e.to_string()))?;
    std::fs::write(path, bytes)?;
    info!(path = %path.display(), keys = %keys.fingerprint(), "Key material written");
    Ok(())
}
