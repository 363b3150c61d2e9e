//! Prometheus metrics for the bridge control plane.
//!
//! All metrics follow the naming convention: `bridge_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Gauge**: readiness, 1 when active (e.g., bridge_active)
//! - **Counter**: monotonically increasing (e.g., bridge_inbound_connections_total)
//! - **Histogram**: distribution (e.g., bridge_startup_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts,
    Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // HEALTH
    // =========================================================================

    /// Aggregated readiness of the whole bridge (1 = active)
    pub static ref BRIDGE_ACTIVE: Gauge = Gauge::new(
        "bridge_active",
        "Aggregated active signal of all supervised services"
    ).expect("metric creation failed");

    /// Per-service readiness
    pub static ref SERVICE_ACTIVE: GaugeVec = GaugeVec::new(
        Opts::new("bridge_service_active", "Active signal per supervised service"),
        &["service"]  // audit / float-supervisor / bridge-supervisor
    ).expect("metric creation failed");

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Supervisor lifecycle transitions
    pub static ref LIFECYCLE_TRANSITIONS: CounterVec = CounterVec::new(
        Opts::new("bridge_lifecycle_transitions_total", "Supervisor lifecycle transitions"),
        &["transition"]  // start / running / start_failed / stop / stopped
    ).expect("metric creation failed");

    /// Time from start() to Running
    pub static ref STARTUP_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "bridge_startup_duration_seconds",
            "Time spent bringing the supervisor to Running"
        ).buckets(
            exponential_buckets(0.001, 2.0, 15).unwrap_or_else(|_| vec![0.01, 0.1, 1.0, 10.0])
        )
    ).expect("metric creation failed");

    /// Network parameter verification outcomes
    pub static ref PARAMETER_VERIFICATIONS: CounterVec = CounterVec::new(
        Opts::new(
            "bridge_parameter_verifications_total",
            "Network parameter verification attempts"
        ),
        &["outcome"]  // verified / missing / signature_invalid / version_incompatible / ...
    ).expect("metric creation failed");

    // =========================================================================
    // TRAFFIC
    // =========================================================================

    /// Inbound connections accepted on the public listener
    pub static ref INBOUND_CONNECTIONS: Counter = Counter::new(
        "bridge_inbound_connections_total",
        "Connections accepted on the public listener"
    ).expect("metric creation failed");

    /// Events recorded by the audit service
    pub static ref AUDIT_EVENTS: CounterVec = CounterVec::new(
        Opts::new("bridge_audit_events_total", "Events recorded by the audit service"),
        &["topic"]
    ).expect("metric creation failed");
}

/// Handle to the registered metrics.
pub struct MetricsHandle {
    registry: Arc<Registry>,
}

impl MetricsHandle {
    /// The registry the bridge metrics are registered in.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register all metrics with the global registry.
///
/// Calling this more than once is harmless: already-registered collectors are
/// skipped.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Health
        Box::new(BRIDGE_ACTIVE.clone()),
        Box::new(SERVICE_ACTIVE.clone()),
        // Lifecycle
        Box::new(LIFECYCLE_TRANSITIONS.clone()),
        Box::new(STARTUP_DURATION.clone()),
        Box::new(PARAMETER_VERIFICATIONS.clone()),
        // Traffic
        Box::new(INBOUND_CONNECTIONS.clone()),
        Box::new(AUDIT_EVENTS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }

    /// Stop the timer and record the elapsed time.
    pub fn observe(self) {}
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
