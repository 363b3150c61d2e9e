//! # Shared Crypto - Trust Chain Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `hashing` | BLAKE3 | Artifact and key fingerprints |
//! | `signatures` | Ed25519 | Certificate and parameter signatures |
//! | `ecdsa` | secp256k1 | Certificate and parameter signatures |
//! | `scheme` | both | Scheme-tagged keys used by certificates |
//!
//! ## Security Properties
//!
//! - **Ed25519**: Deterministic nonces, no RNG dependency
//! - **secp256k1**: RFC 6979 deterministic, low-S normalization
//! - Secret key bytes are zeroized on drop

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ecdsa;
pub mod errors;
pub mod hashing;
pub mod scheme;
pub mod signatures;

// Re-exports
pub use ecdsa::{Secp256k1KeyPair, Secp256k1PublicKey, Secp256k1Signature};
pub use errors::CryptoError;
pub use hashing::{blake3_hash, blake3_hash_many, fingerprint, Blake3Hasher, Hash};
pub use scheme::{KeyPair, PublicKey, SignatureScheme};
pub use signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
