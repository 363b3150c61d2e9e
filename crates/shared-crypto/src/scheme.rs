//! # Scheme-Tagged Keys
//!
//! Certificates carry their signature scheme next to the encoded public key,
//! so verification dispatches on the tag rather than on key length.

use serde::{Deserialize, Serialize};

use crate::ecdsa::{Secp256k1KeyPair, Secp256k1PublicKey, Secp256k1Signature};
use crate::hashing::fingerprint;
use crate::signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
use crate::CryptoError;

/// Signature schemes accepted in a certificate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureScheme {
    /// EdDSA over Curve25519.
    Ed25519,
    /// ECDSA over secp256k1.
    EcdsaSecp256k1,
}

impl SignatureScheme {
    /// Stable one-byte code used in to-be-signed encodings.
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            Self::Ed25519 => 1,
            Self::EcdsaSecp256k1 => 2,
        }
    }

    /// Human-readable scheme name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::EcdsaSecp256k1 => "ecdsa-secp256k1",
        }
    }
}

/// A public key of either supported scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKey {
    /// Ed25519 key.
    Ed25519(Ed25519PublicKey),
    /// Compressed secp256k1 key.
    Secp256k1(Secp256k1PublicKey),
}

impl PublicKey {
    /// Decode a key from its scheme tag and raw encoding.
    pub fn from_encoded(scheme: SignatureScheme, bytes: &[u8]) -> Result<Self, CryptoError> {
        match scheme {
            SignatureScheme::Ed25519 => Ed25519PublicKey::from_slice(bytes).map(Self::Ed25519),
            SignatureScheme::EcdsaSecp256k1 => {
                Secp256k1PublicKey::from_slice(bytes).map(Self::Secp256k1)
            }
        }
    }

    /// The scheme this key belongs to.
    #[must_use]
    pub fn scheme(&self) -> SignatureScheme {
        match self {
            Self::Ed25519(_) => SignatureScheme::Ed25519,
            Self::Secp256k1(_) => SignatureScheme::EcdsaSecp256k1,
        }
    }

    /// Raw key encoding.
    #[must_use]
    pub fn encoded(&self) -> Vec<u8> {
        match self {
            Self::Ed25519(key) => key.as_bytes().to_vec(),
            Self::Secp256k1(key) => key.as_bytes().to_vec(),
        }
    }

    /// Short fingerprint for logs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.encoded())
    }

    /// Verify `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        match self {
            Self::Ed25519(key) => key.verify(message, &Ed25519Signature::from_slice(signature)?),
            Self::Secp256k1(key) => {
                key.verify(message, &Secp256k1Signature::from_slice(signature)?)
            }
        }
    }
}

/// A signing key of either supported scheme.
pub enum KeyPair {
    /// Ed25519 key pair.
    Ed25519(Ed25519KeyPair),
    /// secp256k1 key pair.
    Secp256k1(Secp256k1KeyPair),
}

impl KeyPair {
    /// Generate a fresh random key pair for `scheme`.
    #[must_use]
    pub fn generate(scheme: SignatureScheme) -> Self {
        match scheme {
            SignatureScheme::Ed25519 => Self::Ed25519(Ed25519KeyPair::generate()),
            SignatureScheme::EcdsaSecp256k1 => Self::Secp256k1(Secp256k1KeyPair::generate()),
        }
    }

    /// The public half.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        match self {
            Self::Ed25519(pair) => PublicKey::Ed25519(pair.public_key()),
            Self::Secp256k1(pair) => PublicKey::Secp256k1(pair.public_key()),
        }
    }

    /// Sign `message`, returning the raw signature bytes.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Ed25519(pair) => pair.sign(message).as_bytes().to_vec(),
            Self::Secp256k1(pair) => pair.sign(message).as_bytes().to_vec(),
        }
    }
}
