//! # Health Aggregation
//!
//! Combines the active signals of a set of services into one signal that is
//! true iff every constituent is true.

mod aggregator;

pub use aggregator::{AggregateSubscription, AggregatorError, EmptySetPolicy, StateAggregator};
