//! # Subservice Contract
//!
//! Everything the supervisor starts and stops implements [`Subservice`].
//!
//! ## Rules for implementers
//!
//! 1. `start()` may fail; the failure aborts the supervisor's startup.
//! 2. `stop()` must be safe after a failed or partial `start()`, and safe to
//!    call more than once.
//! 3. `active()` is the service's own readiness. Runtime failures after a
//!    successful start are reported only by this signal going false.

use async_trait::async_trait;
use shared_bus::ActiveSignal;
use shared_types::ServiceId;
use thiserror::Error;

/// A supervised service.
#[async_trait]
pub trait Subservice: Send + Sync {
    /// Get the service ID.
    fn id(&self) -> ServiceId;

    /// Get the service name.
    fn name(&self) -> &'static str {
        self.id().name()
    }

    /// Start the service.
    async fn start(&self) -> Result<(), SubserviceError>;

    /// Stop the service. Idempotent, and tolerant of a partial start.
    async fn stop(&self) -> Result<(), SubserviceError>;

    /// The service's active signal.
    fn active(&self) -> ActiveSignal;
}

/// Subservice error type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("[{service}] {message}")]
pub struct SubserviceError {
    /// Service that failed.
    pub service: ServiceId,
    /// What went wrong.
    pub message: String,
}

impl SubserviceError {
    /// Build an error for `service`.
    pub fn new(service: ServiceId, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_service() {
        let err = SubserviceError::new(ServiceId::FloatSupervisor, "bind failed");
        assert_eq!(err.to_string(), "[float-supervisor] bind failed");
    }
}
