//! # Audit Service
//!
//! Records every event on the bus. Started first and stopped last, so it sees
//! the shutdown of every other service: on stop it drains whatever is still
//! queued before going inactive.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_telemetry::{log_service_event, metric_inc, AUDIT_EVENTS};
use parking_lot::Mutex;
use shared_bus::{
    ActiveSignal, ActiveState, BridgeEvent, EventFilter, InMemoryEventBus, Subscription,
};
use shared_types::ServiceId;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::registry::{Subservice, SubserviceError};

/// Event counts recorded by the audit service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditStats {
    /// Events per topic name.
    pub per_topic: BTreeMap<&'static str, u64>,
    /// All events.
    pub total: u64,
    /// Events the subscription missed by falling behind.
    pub lagged: u64,
}

struct Worker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Subscription>,
}

/// Operational event recorder.
pub struct AuditService {
    bus: Arc<InMemoryEventBus>,
    stats_interval: Duration,
    state: ActiveState,
    stats: Arc<Mutex<AuditStats>>,
    worker: Mutex<Option<Worker>>,
}

impl AuditService {
    /// Create an audit service reading from `bus`, reporting statistics every
    /// `stats_interval`.
    #[must_use]
    pub fn new(bus: Arc<InMemoryEventBus>, stats_interval: Duration) -> Self {
        Self {
            bus,
            stats_interval,
            state: ActiveState::new(ServiceId::Audit.name()),
            stats: Arc::new(Mutex::new(AuditStats::default())),
            worker: Mutex::new(None),
        }
    }

    /// Snapshot of the recorded counts.
    #[must_use]
    pub fn stats(&self) -> AuditStats {
        self.stats.lock().clone()
    }

    /// Events recorded for one topic.
    #[must_use]
    pub fn topic_count(&self, topic: &str) -> u64 {
        self.stats.lock().per_topic.get(topic).copied().unwrap_or(0)
    }

    /// Total events recorded.
    #[must_use]
    pub fn recorded(&self) -> u64 {
        self.stats.lock().total
    }
}

fn record(stats: &Mutex<AuditStats>, event: &BridgeEvent) {
    let topic = event.topic().name();
    {
        let mut stats = stats.lock();
        *stats.per_topic.entry(topic).or_insert(0) += 1;
        stats.total += 1;
    }
    metric_inc!(AUDIT_EVENTS, &[topic]);

    match event {
        BridgeEvent::CriticalError { service, error } => {
            error!(audit = topic, %service, %error, "Critical error reported");
        }
        BridgeEvent::ControlCommandReceived {
            command,
            accepted: false,
        } => {
            warn!(audit = topic, %command, "Control command rejected");
        }
        other => {
            info!(audit = topic, event = ?other, "Audit record");
        }
    }
}

fn report(stats: &Mutex<AuditStats>) {
    let stats = stats.lock();
    log_service_event!(
        info,
        ServiceId::Audit.name(),
        "Audit statistics",
        total = stats.total,
        lagged = stats.lagged,
        per_topic = ?stats.per_topic
    );
}

async fn run(
    mut subscription: Subscription,
    stats: Arc<Mutex<AuditStats>>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> Subscription {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = subscription.recv() => match event {
                Some(event) => record(&stats, &event),
                None => {
                    debug!("Event bus closed, audit loop exiting");
                    break;
                }
            },
            _ = ticker.tick() => {
                stats.lock().lagged = subscription.lagged();
                report(&stats);
            }
        }
    }
    subscription
}

#[async_trait]
impl Subservice for AuditService {
    fn id(&self) -> ServiceId {
        ServiceId::Audit
    }

    async fn start(&self) -> Result<(), SubserviceError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let subscription = self.bus.subscribe(EventFilter::all());
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(
            subscription,
            Arc::clone(&self.stats),
            self.stats_interval,
            shutdown_rx,
        ));
        *worker = Some(Worker { shutdown, handle });
        drop(worker);

        self.state.set(true);
        log_service_event!(
            info,
            self.name(),
            "Audit service started",
            stats_interval_secs = self.stats_interval.as_secs()
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubserviceError> {
        let Some(worker) = self.worker.lock().take() else {
            self.state.set(false);
            return Ok(());
        };

        // The loop may already have exited on its own.
        let _ = worker.shutdown.send(());
        let result = match worker.handle.await {
            Ok(mut subscription) => {
                let mut drained = 0u64;
                while let Ok(Some(event)) = subscription.try_recv() {
                    record(&self.stats, &event);
                    drained += 1;
                }
                self.stats.lock().lagged = subscription.lagged();
                debug!(drained, "Audit queue drained");
                Ok(())
            }
            Err(e) => Err(SubserviceError::new(
                self.id(),
                format!("audit task failed: {e}"),
            )),
        };

        self.state.set(false);
        report(&self.stats);
        log_service_event!(info, self.name(), "Audit service stopped");
        result
    }

    fn active(&self) -> ActiveSignal {
        self.state.signal()
    }
}
