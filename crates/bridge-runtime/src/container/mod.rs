//! # Runtime Configuration
//!
//! Process-level configuration for one bridge: mode, base directory, local
//! platform version and the collaborator addresses.

pub mod config;

pub use config::{
    AuditConfig, BridgeConfig, ConfigError, HealthConfig, NetworkConfig, BRIDGE_KEYS_FILE,
    PLATFORM_VERSION,
};
