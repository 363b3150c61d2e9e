//! # Type Errors
//!
//! Errors raised while parsing or encoding shared types.

use thiserror::Error;

/// Parsing and encoding failures.
#[derive(Debug, Error)]
pub enum TypeError {
    /// Unknown bridge mode name.
    #[error("Unknown bridge mode '{0}' (expected SenderReceiver, FloatInner or FloatOuter)")]
    UnknownMode(String),

    /// Canonical JSON encoding failed.
    #[error("Encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}
