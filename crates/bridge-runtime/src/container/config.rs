//! # Bridge Configuration
//!
//! Process configuration with defaults and environment overrides.
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `BRIDGE_MODE` | `mode` | `SenderReceiver` |
//! | `BRIDGE_BASE_DIR` | `base_directory` | `./bridge` |
//! | `BRIDGE_PLATFORM_VERSION` | `platform_version` | [`PLATFORM_VERSION`] |
//! | `BRIDGE_LISTEN_ADDRESS` | `network.listen_address` | `0.0.0.0:10002` |
//! | `BRIDGE_BROKER_ADDRESS` | `network.broker_address` | `127.0.0.1:11005` |
//! | `BRIDGE_CONTROL_ADDRESS` | `network.control_address` | `127.0.0.1:12005` |
//! | `BRIDGE_RECONNECT_MS` | `network.reconnect_interval_ms` | `1000` |
//! | `BRIDGE_AUDIT_INTERVAL_SECS` | `audit.stats_interval_secs` | `60` |
//! | `BRIDGE_ALLOW_EMPTY_TOPOLOGY` | `health.empty_set_policy` | require members |
//!
//! Values that do not parse are errors, never silently replaced by defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use shared_types::BridgeMode;
use thiserror::Error;

use crate::health::EmptySetPolicy;
use crate::parameters::{CERTIFICATES_DIR, NETWORK_PARAMETERS_FILE, TRUST_STORE_FILE};

/// Platform version this build implements.
pub const PLATFORM_VERSION: u32 = 4;

/// File under `certificates/` holding the bridge's TLS key material.
pub const BRIDGE_KEYS_FILE: &str = "bridge-keys.json";

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `BRIDGE_MODE` is not a known mode.
    #[error("Unknown bridge mode '{0}' (expected SenderReceiver, FloatInner or FloatOuter)")]
    InvalidMode(String),

    /// A variable holds a value of the wrong shape.
    #[error("Invalid value '{value}' for {variable}")]
    InvalidValue {
        /// Environment variable.
        variable: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Deployment mode.
    pub mode: BridgeMode,
    /// Directory holding the trust store, parameters and key material.
    pub base_directory: PathBuf,
    /// Local platform version checked against the network minimum.
    pub platform_version: u32,
    /// Socket addresses.
    pub network: NetworkConfig,
    /// Audit service settings.
    pub audit: AuditConfig,
    /// Health aggregation settings.
    pub health: HealthConfig,
}

/// Socket addresses and timers.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Public listener (float).
    pub listen_address: String,
    /// Message broker (bridge).
    pub broker_address: String,
    /// Float control channel. The float listens here; a controller connects.
    pub control_address: String,
    /// Delay between reconnect and re-activation attempts.
    pub reconnect_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:10002".to_string(),
            broker_address: "127.0.0.1:11005".to_string(),
            control_address: "127.0.0.1:12005".to_string(),
            reconnect_interval_ms: 1000,
        }
    }
}

impl NetworkConfig {
    /// Reconnect interval as a duration.
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Audit configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Seconds between statistics reports.
    pub stats_interval_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: 60,
        }
    }
}

impl AuditConfig {
    /// Statistics interval as a duration.
    #[must_use]
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }
}

/// Health aggregation configuration.
#[derive(Debug, Clone, Default)]
pub struct HealthConfig {
    /// Behaviour of an aggregate over no services.
    pub empty_set_policy: EmptySetPolicy,
}

impl BridgeConfig {
    /// Defaults for `mode`.
    #[must_use]
    pub fn for_mode(mode: BridgeMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Defaults overridden by `BRIDGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = lookup("BRIDGE_MODE") {
            config.mode = mode
                .parse()
                .map_err(|_| ConfigError::InvalidMode(mode.clone()))?;
        }
        if let Some(dir) = lookup("BRIDGE_BASE_DIR") {
            config.base_directory = PathBuf::from(dir);
        }
        if let Some(version) = lookup("BRIDGE_PLATFORM_VERSION") {
            config.platform_version = parse("BRIDGE_PLATFORM_VERSION", &version)?;
        }
        if let Some(address) = lookup("BRIDGE_LISTEN_ADDRESS") {
            config.network.listen_address = address;
        }
        if let Some(address) = lookup("BRIDGE_BROKER_ADDRESS") {
            config.network.broker_address = address;
        }
        if let Some(address) = lookup("BRIDGE_CONTROL_ADDRESS") {
            config.network.control_address = address;
        }
        if let Some(ms) = lookup("BRIDGE_RECONNECT_MS") {
            config.network.reconnect_interval_ms = parse("BRIDGE_RECONNECT_MS", &ms)?;
        }
        if let Some(secs) = lookup("BRIDGE_AUDIT_INTERVAL_SECS") {
            config.audit.stats_interval_secs = parse("BRIDGE_AUDIT_INTERVAL_SECS", &secs)?;
        }
        if let Some(allow) = lookup("BRIDGE_ALLOW_EMPTY_TOPOLOGY") {
            let allow: bool = parse("BRIDGE_ALLOW_EMPTY_TOPOLOGY", &allow)?;
            config.health.empty_set_policy = if allow {
                EmptySetPolicy::VacuouslyActive
            } else {
                EmptySetPolicy::RequireMembers
            };
        }

        Ok(config)
    }

    /// Signed network parameters artifact.
    #[must_use]
    pub fn network_parameters_path(&self) -> PathBuf {
        self.base_directory.join(NETWORK_PARAMETERS_FILE)
    }

    /// Network root trust store.
    #[must_use]
    pub fn trust_store_path(&self) -> PathBuf {
        self.base_directory
            .join(CERTIFICATES_DIR)
            .join(TRUST_STORE_FILE)
    }

    /// Bridge TLS key material.
    #[must_use]
    pub fn key_material_path(&self) -> PathBuf {
        self.base_directory
            .join(CERTIFICATES_DIR)
            .join(BRIDGE_KEYS_FILE)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: BridgeMode::SenderReceiver,
            base_directory: PathBuf::from("./bridge"),
            platform_version: PLATFORM_VERSION,
            network: NetworkConfig::default(),
            audit: AuditConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

fn parse<T: FromStr>(variable: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        variable,
        value: value.to_string(),
    })
}
