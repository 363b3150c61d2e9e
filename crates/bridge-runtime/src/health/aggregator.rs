//! # State Aggregator
//!
//! Push-based fan-in over [`ActiveSignal`]s. Each constituent gets a
//! synchronous change listener that recomputes the aggregate under one lock,
//! so by the time a constituent's `set()` returns the aggregate already
//! reflects it.
//!
//! ```text
//! constituent.set(false)
//!   └─ listener (same call) ─► recompute() ─► target.set(false)
//!                                               └─ target listeners
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared_bus::{ActiveSignal, ActiveState, SignalListener};
use thiserror::Error;
use tokio_stream::wrappers::WatchStream;
use tracing::trace;

use crate::registry::Subservice;

/// How an aggregate over zero constituents behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmptySetPolicy {
    /// Reject empty sets with [`AggregatorError::NoConstituents`].
    #[default]
    RequireMembers,
    /// An empty set is active.
    VacuouslyActive,
}

/// Aggregation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregatorError {
    /// Empty constituent set under [`EmptySetPolicy::RequireMembers`].
    #[error("Cannot aggregate an empty set of services")]
    NoConstituents,
}

/// Builds aggregate subscriptions.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateAggregator {
    policy: EmptySetPolicy,
}

impl StateAggregator {
    /// Aggregator with the given empty-set policy.
    #[must_use]
    pub fn new(policy: EmptySetPolicy) -> Self {
        Self { policy }
    }

    /// The empty-set policy.
    #[must_use]
    pub fn policy(&self) -> EmptySetPolicy {
        self.policy
    }

    /// Observe `constituents` into a fresh signal named `name`.
    pub fn observe(
        &self,
        name: &str,
        constituents: Vec<ActiveSignal>,
    ) -> Result<AggregateSubscription, AggregatorError> {
        self.observe_into(constituents, ActiveState::new(name))
    }

    /// Observe the active signals of `services`.
    pub fn observe_services(
        &self,
        name: &str,
        services: &[Arc<dyn Subservice>],
    ) -> Result<AggregateSubscription, AggregatorError> {
        self.observe(name, services.iter().map(|s| s.active()).collect())
    }

    /// Observe `constituents`, writing the aggregate into `target`.
    ///
    /// `target` is brought up to date before this returns.
    pub fn observe_into(
        &self,
        constituents: Vec<ActiveSignal>,
        target: ActiveState,
    ) -> Result<AggregateSubscription, AggregatorError> {
        if constituents.is_empty() && self.policy == EmptySetPolicy::RequireMembers {
            return Err(AggregatorError::NoConstituents);
        }

        let shared = Arc::new(Aggregate {
            constituents,
            target,
            state: Mutex::new(AggregateState::default()),
        });

        let listeners = shared
            .constituents
            .iter()
            .map(|signal| {
                let weak: Weak<Aggregate> = Arc::downgrade(&shared);
                signal.on_change(move |_| {
                    if let Some(aggregate) = weak.upgrade() {
                        aggregate.recompute();
                    }
                })
            })
            .collect();

        shared.recompute();

        Ok(AggregateSubscription {
            shared,
            listeners: Mutex::new(listeners),
            disposed: AtomicBool::new(false),
        })
    }
}

#[derive(Debug, Default)]
struct AggregateState {
    forced_inactive: bool,
    disposed: bool,
}

struct Aggregate {
    constituents: Vec<ActiveSignal>,
    target: ActiveState,
    state: Mutex<AggregateState>,
}

impl Aggregate {
    fn recompute(&self) {
        let state = self.state.lock();
        if state.disposed {
            return;
        }
        let active =
            !state.forced_inactive && self.constituents.iter().all(ActiveSignal::is_active);
        if self.target.set(active) {
            trace!(active, "Aggregate active signal changed");
        }
    }
}

/// A live aggregate. Dropping it disposes it.
pub struct AggregateSubscription {
    shared: Arc<Aggregate>,
    listeners: Mutex<Vec<SignalListener>>,
    disposed: AtomicBool,
}

impl AggregateSubscription {
    /// Reader for the aggregate signal.
    #[must_use]
    pub fn signal(&self) -> ActiveSignal {
        self.shared.target.signal()
    }

    /// Current aggregate value.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.target.is_active()
    }

    /// Aggregate values: the current one first, then every change.
    #[must_use]
    pub fn stream(&self) -> WatchStream<bool> {
        self.signal().stream()
    }

    /// Number of constituents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.constituents.len()
    }

    /// Whether there are no constituents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.constituents.is_empty()
    }

    /// Latch the aggregate to false regardless of constituents.
    ///
    /// Takes effect before this returns. Cannot be undone.
    pub fn force_inactive(&self) {
        let mut state = self.state_lock();
        state.forced_inactive = true;
        if !state.disposed {
            self.shared.target.set(false);
        }
    }

    /// Stop observing. Idempotent; the aggregate keeps its last value and no
    /// further updates are delivered.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state_lock().disposed = true;
        for listener in self.listeners.lock().drain(..) {
            listener.remove();
        }
    }

    /// Whether [`Self::dispose`] has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn state_lock(&self) -> parking_lot::MutexGuard<'_, AggregateState> {
        self.shared.state.lock()
    }
}

impl Drop for AggregateSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn states(k: usize) -> Vec<ActiveState> {
        (0..k).map(|i| ActiveState::new(format!("svc-{i}"))).collect()
    }

    fn signals(states: &[ActiveState]) -> Vec<ActiveSignal> {
        states.iter().map(ActiveState::signal).collect()
    }

    #[test]
    fn test_active_iff_all_active() {
        let members = states(3);
        let aggregate = StateAggregator::default()
            .observe("all", signals(&members))
            .unwrap();
        assert!(!aggregate.is_active());

        members[0].set(true);
        members[1].set(true);
        assert!(!aggregate.is_active());

        members[2].set(true);
        assert!(aggregate.is_active());
    }

    #[test]
    fn test_single_flip_propagates_and_recovers() {
        let members = states(4);
        for m in &members {
            m.set(true);
        }
        let aggregate = StateAggregator::default()
            .observe("all", signals(&members))
            .unwrap();
        assert!(aggregate.is_active());

        members[2].set(false);
        assert!(!aggregate.is_active());

        members[1].set(false);
        members[2].set(true);
        assert!(!aggregate.is_active(), "one member still inactive");

        members[1].set(true);
        assert!(aggregate.is_active());
    }

    #[test]
    fn test_aggregate_updated_before_set_returns() {
        let member = ActiveState::new("svc");
        let aggregate = StateAggregator::default()
            .observe("all", vec![member.signal()])
            .unwrap();
        let aggregate_signal = aggregate.signal();

        // A listener on the constituent registered after the aggregator's
        // must already see the aggregate updated.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _guard = member
            .signal()
            .on_change(move |_| sink.lock().push(aggregate_signal.is_active()));

        member.set(true);
        member.set(false);
        assert_eq!(*seen.lock(), vec![true, false]);
    }

    #[test]
    fn test_empty_set_rejected_by_default() {
        let result = StateAggregator::default().observe("none", Vec::new());
        assert!(matches!(result, Err(AggregatorError::NoConstituents)));
    }

    #[test]
    fn test_empty_set_vacuously_active() {
        let aggregate = StateAggregator::new(EmptySetPolicy::VacuouslyActive)
            .observe("none", Vec::new())
            .unwrap();
        assert!(aggregate.is_active());
        assert!(aggregate.is_empty());
    }

    #[test]
    fn test_force_inactive_latches() {
        let members = states(2);
        for m in &members {
            m.set(true);
        }
        let aggregate = StateAggregator::default()
            .observe("all", signals(&members))
            .unwrap();

        aggregate.force_inactive();
        assert!(!aggregate.is_active());

        members[0].set(false);
        members[0].set(true);
        assert!(!aggregate.is_active());
    }

    #[test]
    fn test_dispose_is_idempotent_and_freezes_value() {
        let members = states(1);
        let aggregate = StateAggregator::default()
            .observe("all", signals(&members))
            .unwrap();
        let signal = aggregate.signal();

        aggregate.dispose();
        aggregate.dispose();
        assert!(aggregate.is_disposed());
        assert_eq!(members[0].signal().listener_count(), 0);

        members[0].set(true);
        assert!(!signal.is_active());
    }

    #[test]
    fn test_drop_detaches_listeners() {
        let members = states(2);
        let aggregate = StateAggregator::default()
            .observe("all", signals(&members))
            .unwrap();
        assert_eq!(members[0].signal().listener_count(), 1);

        drop(aggregate);
        assert_eq!(members[0].signal().listener_count(), 0);
        assert_eq!(members[1].signal().listener_count(), 0);
    }

    #[test]
    fn test_observe_into_existing_target() {
        let target = ActiveState::with_initial("bridge", true);
        let member = ActiveState::new("svc");

        let _aggregate = StateAggregator::default()
            .observe_into(vec![member.signal()], target.clone())
            .unwrap();
        assert!(!target.is_active(), "target brought up to date on observe");

        member.set(true);
        assert!(target.is_active());
    }

    #[test]
    fn test_nested_aggregates() {
        let leaves = states(2);
        let inner = StateAggregator::default()
            .observe("inner", signals(&leaves))
            .unwrap();
        let other = ActiveState::new("other");
        let outer = StateAggregator::default()
            .observe("outer", vec![inner.signal(), other.signal()])
            .unwrap();

        other.set(true);
        leaves[0].set(true);
        leaves[1].set(true);
        assert!(outer.is_active());

        leaves[0].set(false);
        assert!(!outer.is_active());
    }

    #[tokio::test]
    async fn test_stream_reports_transitions() {
        let member = ActiveState::new("svc");
        let aggregate = StateAggregator::default()
            .observe("all", vec![member.signal()])
            .unwrap();
        let mut stream = aggregate.stream();

        assert_eq!(stream.next().await, Some(false));
        member.set(true);
        let next = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .unwrap();
        assert_eq!(next, Some(true));
    }

    #[test]
    fn test_concurrent_flips_settle_on_final_values() {
        let members = states(8);
        let aggregate = StateAggregator::default()
            .observe("all", signals(&members))
            .unwrap();

        std::thread::scope(|scope| {
            for member in &members {
                scope.spawn(move || {
                    for _ in 0..100 {
                        member.set(true);
                        member.set(false);
                    }
                    member.set(true);
                });
            }
        });

        assert!(aggregate.is_active());
    }
}
