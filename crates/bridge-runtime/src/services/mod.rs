//! # Subservices
//!
//! The three services a topology can hold. Each implements
//! [`Subservice`](crate::registry::Subservice).
//!
//! | Service | Owns | Active when |
//! |---------|------|-------------|
//! | [`AuditService`] | event bus subscription | between start and stop |
//! | [`FloatSupervisorService`] | listener, control endpoint (FloatOuter) | listener ready (and endpoint up) |
//! | [`BridgeSupervisorService`] | queue connector, control tunnel (FloatInner) | queue connected and activation target up |

mod audit;
mod bridge;
mod float;

pub use audit::{AuditService, AuditStats};
pub use bridge::{ActivationTarget, BridgeSupervisorService};
pub use float::FloatSupervisorService;
