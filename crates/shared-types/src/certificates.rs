//! # Certificates
//!
//! A minimal certificate model for the parameter trust chain: who the key
//! belongs to, who vouched for it, what it may sign, and the issuer's
//! signature over those facts.

use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use shared_crypto::{CryptoError, PublicKey, SignatureScheme};

/// Domain separator prefixed to every to-be-signed certificate encoding.
const CERTIFICATE_DOMAIN: &[u8] = b"float-bridge/certificate/v1";

/// What a certificate's key is allowed to sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateRole {
    /// Self-signed network root.
    Root,
    /// Intermediate authority issued by the root.
    Intermediate,
    /// Leaf allowed to sign network parameters.
    NetworkParameters,
}

impl CertificateRole {
    fn code(&self) -> u8 {
        match self {
            Self::Root => 1,
            Self::Intermediate => 2,
            Self::NetworkParameters => 3,
        }
    }
}

/// A signed binding of a subject name and role to a public key.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Subject name.
    pub subject: String,
    /// Issuer subject name (equal to `subject` for a self-signed root).
    pub issuer: String,
    /// Permitted use.
    pub role: CertificateRole,
    /// Scheme of `public_key`.
    pub scheme: SignatureScheme,
    /// Raw public key encoding.
    #[serde_as(as = "Hex")]
    pub public_key: Vec<u8>,
    /// Issuer's signature over [`Certificate::to_be_signed`].
    #[serde_as(as = "Hex")]
    pub signature: Vec<u8>,
}

impl Certificate {
    /// Deterministic encoding of every field except the signature.
    #[must_use]
    pub fn to_be_signed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            CERTIFICATE_DOMAIN.len() + self.subject.len() + self.issuer.len() + 64,
        );
        out.extend_from_slice(CERTIFICATE_DOMAIN);
        push_length_prefixed(&mut out, self.subject.as_bytes());
        push_length_prefixed(&mut out, self.issuer.as_bytes());
        out.push(self.role.code());
        out.push(self.scheme.code());
        push_length_prefixed(&mut out, &self.public_key);
        out
    }

    /// Decode the embedded public key.
    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        PublicKey::from_encoded(self.scheme, &self.public_key)
    }

    /// Whether the certificate names itself as issuer.
    #[must_use]
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}

fn push_length_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// The locally trusted network root, as loaded from the trust store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRoot {
    /// Self-signed root certificate.
    pub certificate: Certificate,
}

impl TrustRoot {
    /// Wrap a root certificate.
    #[must_use]
    pub fn new(certificate: Certificate) -> Self {
        Self { certificate }
    }

    /// Root subject name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.certificate.subject
    }
}
