//! Errors raised while decoding keys or checking signatures in the trust chain.

use thiserror::Error;

use crate::SignatureScheme;

/// Key and signature failures.
///
/// Callers in the parameter bootstrap collapse all of these into a single
/// "signature invalid" rejection; the variants exist for logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Encoded key has the wrong size for its scheme.
    #[error("{} key must be {expected} bytes, got {actual}", .scheme.name())]
    InvalidKeyLength {
        /// Scheme the key was decoded for.
        scheme: SignatureScheme,
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// Bytes of the right size that are not a point on the curve.
    #[error("Not a valid {} public key", .0.name())]
    InvalidPublicKey(SignatureScheme),

    /// Secret scalar out of range.
    #[error("Not a valid {} secret key", .0.name())]
    InvalidPrivateKey(SignatureScheme),

    /// Signature bytes could not be parsed.
    #[error("Malformed signature")]
    InvalidSignatureFormat,

    /// Well-formed signature that does not match the message and key.
    #[error("Signature does not verify")]
    SignatureVerificationFailed,
}
