//! # Shared Types Crate
//!
//! Domain entities shared across the bridge workspace.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: modes, service identifiers and on-disk
//!   artifact formats are defined once, here.
//! - **Encoding is explicit**: everything that is signed has a canonical
//!   byte encoding next to its type (`to_canonical_bytes`, `to_be_signed`).

pub mod certificates;
pub mod control;
pub mod errors;
pub mod mode;
pub mod parameters;

pub use certificates::{Certificate, CertificateRole, TrustRoot};
pub use control::{ControlCommand, KeyMaterial};
pub use errors::TypeError;
pub use mode::{BridgeMode, ServiceId};
pub use parameters::{NetworkParameters, NotaryInfo, SignedNetworkParameters};
