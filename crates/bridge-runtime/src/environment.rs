//! # Runtime Environment
//!
//! Process-wide state shared by every supervisor in the process: the codec
//! used for on-disk artifacts and the time the process was initialised.
//!
//! Lifecycle: initialised once, by the first `Supervisor::start()` (or the
//! first artifact read), before any service is constructed. It is never
//! mutated or torn down afterwards.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Largest artifact the codec will decode (10 MiB).
pub const MAX_ARTIFACT_SIZE: usize = 10 * 1024 * 1024;

static ENVIRONMENT: OnceLock<RuntimeEnvironment> = OnceLock::new();

/// Errors from the artifact codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The artifact exceeds the codec's size limit.
    #[error("{what} is {size} bytes, limit is {limit}")]
    TooLarge {
        /// Artifact description.
        what: &'static str,
        /// Actual size.
        size: usize,
        /// Limit.
        limit: usize,
    },

    /// The artifact is not valid JSON for the expected type.
    #[error("{what} is malformed: {source}")]
    Malformed {
        /// Artifact description.
        what: &'static str,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
}

/// Codec for the JSON artifacts the bridge reads and writes.
#[derive(Debug, Clone)]
pub struct ArtifactCodec {
    max_artifact_size: usize,
}

impl ArtifactCodec {
    /// Size limit in bytes.
    #[must_use]
    pub fn max_artifact_size(&self) -> usize {
        self.max_artifact_size
    }

    /// Decode `bytes` as a `T`, enforcing the size limit.
    pub fn decode<T: DeserializeOwned>(
        &self,
        what: &'static str,
        bytes: &[u8],
    ) -> Result<T, CodecError> {
        if bytes.len() > self.max_artifact_size {
            return Err(CodecError::TooLarge {
                what,
                size: bytes.len(),
                limit: self.max_artifact_size,
            });
        }
        serde_json::from_slice(bytes).map_err(|source| CodecError::Malformed { what, source })
    }

    /// Encode `value` as pretty-printed JSON.
    pub fn encode<T: Serialize>(
        &self,
        what: &'static str,
        value: &T,
    ) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec_pretty(value).map_err(|source| CodecError::Malformed { what, source })
    }
}

/// Process-wide runtime environment.
#[derive(Debug)]
pub struct RuntimeEnvironment {
    codec: ArtifactCodec,
    initialised_at: DateTime<Utc>,
}

impl RuntimeEnvironment {
    /// Artifact codec.
    #[must_use]
    pub fn codec(&self) -> &ArtifactCodec {
        &self.codec
    }

    /// When the environment was installed.
    #[must_use]
    pub fn initialised_at(&self) -> DateTime<Utc> {
        self.initialised_at
    }
}

/// Install the environment if absent and return it. Idempotent.
pub fn init() -> &'static RuntimeEnvironment {
    ENVIRONMENT.get_or_init(|| {
        debug!(max_artifact_size = MAX_ARTIFACT_SIZE, "Runtime environment initialised");
        RuntimeEnvironment {
            codec: ArtifactCodec {
                max_artifact_size: MAX_ARTIFACT_SIZE,
            },
            initialised_at: Utc::now(),
        }
    })
}

/// The environment, if it has been installed.
#[must_use]
pub fn get() -> Option<&'static RuntimeEnvironment> {
    ENVIRONMENT.get()
}

/// Shorthand for `init().codec()`.
pub fn codec() -> &'static ArtifactCodec {
    init().codec()
}
