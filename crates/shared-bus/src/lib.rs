//! # Shared Bus - Control Plane Events and Active Signals
//!
//! Two primitives every bridge service is built on:
//!
//! - **Event bus**: fire-and-forget operational events (`BridgeEvent`) fanned
//!   out over a broadcast channel. The audit service is the main consumer.
//! - **Active signal**: a boolean cell (`ActiveState` writer, `ActiveSignal`
//!   reader) with synchronous change listeners, used to publish and combine
//!   readiness across services.
//!
//! ```text
//! ┌──────────────┐  publish()   ┌──────────────┐  subscribe()  ┌──────────────┐
//! │  Supervisor  │ ───────────► │  Event Bus   │ ────────────► │    Audit     │
//! │  Services    │              │ (broadcast)  │               │   Service    │
//! └──────┬───────┘              └──────────────┘               └──────────────┘
//!        │ set()
//!        ▼
//! ┌──────────────┐  on_change()  ┌──────────────┐
//! │ ActiveState  │ ────────────► │  Aggregator  │
//! └──────────────┘  (same call)  └──────────────┘
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod signal;
pub mod subscriber;

// Re-export main types
pub use events::{BridgeEvent, EventFilter, EventTopic};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use signal::{ActiveSignal, ActiveState, SignalListener};
pub use subscriber::{EventStream, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before the oldest are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 1024);
    }
}
