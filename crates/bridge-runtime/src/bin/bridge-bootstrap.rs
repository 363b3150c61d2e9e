//! # Development Bootstrapper
//!
//! Writes a throwaway network into `BRIDGE_BASE_DIR`: a trust root, signed
//! network parameters and bridge key material. Never use the output outside
//! development.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `BRIDGE_BASE_DIR` | `./bridge` |
//! | `BOOTSTRAP_MAX_MESSAGE_SIZE` | `10485760` |
//! | `BOOTSTRAP_MIN_PLATFORM_VERSION` | `PLATFORM_VERSION` |
//! | `BOOTSTRAP_SCHEME` | `ed25519` (or `secp256k1`) |
//! | `BOOTSTRAP_IDENTITY` | `O=Dev Bridge, L=London, C=GB` |

use std::env;

use anyhow::{bail, Context, Result};
use bridge_runtime::adapters::{generate_dev_keys, write_key_material};
use bridge_runtime::parameters::DevNetworkAuthority;
use bridge_runtime::{BridgeConfig, PLATFORM_VERSION};
use bridge_telemetry::{init_logging, TelemetryConfig};
use shared_crypto::SignatureScheme;
use tracing::info;

const DEFAULT_MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

fn main() -> Result<()> {
    init_logging(&TelemetryConfig::for_binary("bridge-bootstrap"))
        .context("failed to initialise logging")?;

    let config = BridgeConfig::from_env().context("invalid bridge configuration")?;
    let max_message_size = number("BOOTSTRAP_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE)?;
    let minimum_platform_version = number("BOOTSTRAP_MIN_PLATFORM_VERSION", PLATFORM_VERSION)?;
    let scheme = match env::var("BOOTSTRAP_SCHEME").as_deref() {
        Err(_) | Ok("ed25519") => SignatureScheme::Ed25519,
        Ok("secp256k1") => SignatureScheme::EcdsaSecp256k1,
        Ok(other) => bail!("unknown BOOTSTRAP_SCHEME '{other}' (expected ed25519 or secp256k1)"),
    };
    let identity = env::var("BOOTSTRAP_IDENTITY")
        .unwrap_or_else(|_| "O=Dev Bridge, L=London, C=GB".to_string());

    let authority = DevNetworkAuthority::generate(scheme);
    let parameters =
        DevNetworkAuthority::default_parameters(max_message_size, minimum_platform_version);
    authority
        .write_artifacts(&config.base_directory, &parameters)
        .context("failed to write network artifacts")?;

    let keys = generate_dev_keys(&identity);
    write_key_material(&config.key_material_path(), &keys)
        .context("failed to write key material")?;

    info!(
        base = %config.base_directory.display(),
        max_message_size,
        minimum_platform_version,
        scheme = ?scheme,
        identity = %identity,
        "Development network bootstrapped"
    );
    Ok(())
}

fn number(variable: &str, default: u32) -> Result<u32> {
    match env::var(variable) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid {variable} '{value}'")),
        Err(_) => Ok(default),
    }
}
