//! End-to-end scenarios, one module per concern.

pub mod bootstrap;
pub mod lifecycle;
pub mod modes;
pub mod network;
