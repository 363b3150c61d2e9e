//! # Float Bridge Runtime
//!
//! Process entry point for one bridge in any of the three modes.
//!
//! ## Startup Sequence
//!
//! 1. Initialise logging and metrics (`BRIDGE_LOG_LEVEL`, `BRIDGE_JSON_LOGS`)
//! 2. Load `BridgeConfig` from `BRIDGE_*` variables
//! 3. Start the supervisor (parameters, topology, services)
//! 4. Serve `/metrics` and `/health` on `BRIDGE_METRICS_PORT`
//! 5. Wait for the exit signal (SIGINT / SIGTERM / SIGQUIT stop the bridge)

use std::sync::Arc;

use anyhow::{Context, Result};
use bridge_runtime::adapters::{serve_admin, TcpCollaborators};
use bridge_runtime::{BridgeConfig, Supervisor};
use bridge_telemetry::{init_telemetry, TelemetryConfig};
use shared_bus::InMemoryEventBus;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::for_binary("bridge-runtime");
    let _telemetry = init_telemetry(&telemetry).context("failed to initialise telemetry")?;

    let config = BridgeConfig::from_env().context("invalid bridge configuration")?;
    info!("===========================================");
    info!("  Float Bridge Runtime v{}", env!("CARGO_PKG_VERSION"));
    info!("  Mode: {}", config.mode);
    info!("  Base directory: {}", config.base_directory.display());
    info!("===========================================");

    let bus = Arc::new(InMemoryEventBus::new());
    let factory = TcpCollaborators::new(config.clone(), Arc::clone(&bus));
    let supervisor = Supervisor::with_bus(config, factory, bus);

    supervisor
        .start()
        .await
        .context("bridge failed to start")?;

    let port = telemetry.metrics_port;
    let admin_supervisor = Arc::clone(&supervisor);
    let admin = tokio::spawn(async move {
        if let Err(e) = serve_admin(port, admin_supervisor).await {
            warn!(port, error = %e, "Admin endpoint disabled");
        }
    });

    info!("Bridge is running. Send SIGINT or SIGTERM to stop.");
    let exit = supervisor.exit_signal().wait().await;
    admin.abort();

    match exit {
        Some(status) => info!(
            reason = status.reason.name(),
            stopped_at = %status.stopped_at,
            "Bridge exited"
        ),
        None => warn!("Supervisor dropped without stopping"),
    }
    Ok(())
}
