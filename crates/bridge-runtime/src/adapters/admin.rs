//! Admin HTTP endpoint.
//!
//! ```text
//! GET /metrics   Prometheus text exposition of the bridge registry
//! GET /health    supervisor state as JSON, 503 while inactive
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bridge_telemetry::encode_metrics;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::supervisor::{LifecycleState, Supervisor};

/// Content type of the Prometheus text format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Router serving metrics and health for one supervisor.
pub fn admin_router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(supervisor)
}

/// Serve [`admin_router`] on `port` until the task is dropped.
pub async fn serve_admin(port: u16, supervisor: Arc<Supervisor>) -> std::io::Result<()> {
    let address = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(address).await?;
    info!(address = %address, "Serving admin endpoint");
    axum::serve(listener, admin_router(supervisor)).await
}

async fn metrics() -> Response {
    match encode_metrics() {
        Ok(body) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health(State(supervisor): State<Arc<Supervisor>>) -> impl IntoResponse {
    let active = supervisor.is_active();
    let state = match supervisor.state() {
        LifecycleState::Running => "running",
        LifecycleState::Stopped => "stopped",
    };
    let status = if active {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if active { "active" } else { "inactive" },
            "state": state,
            "mode": supervisor.mode().to_string(),
            "service": "bridge-runtime",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
