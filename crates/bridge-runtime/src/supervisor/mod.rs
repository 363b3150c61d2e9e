//! # Supervisor
//!
//! Owns the lifecycle of one bridge process.
//!
//! ```text
//!            start()                    stop()
//! Stopped ──────────► Starting ──► Running ──────► Stopping ──► Terminated
//!    ▲                   │
//!    └───── failure ─────┘
//! ```
//!
//! Every transition is a compare-and-set on one atomic phase, so concurrent
//! `start()`/`stop()` callers (an explicit stop racing the termination hook)
//! cannot both get through. A stop requested while starting is deferred and
//! runs as soon as start reaches Running. The supervisor is single-use: a
//! stopped supervisor cannot be restarted.

mod exit;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use bridge_telemetry::{
    metric_inc, HistogramTimer, BRIDGE_ACTIVE, LIFECYCLE_TRANSITIONS, SERVICE_ACTIVE,
    STARTUP_DURATION,
};
use chrono::Utc;
use parking_lot::Mutex;
use shared_bus::{
    ActiveSignal, ActiveState, BridgeEvent, EventPublisher, InMemoryEventBus, SignalListener,
};
use shared_types::{BridgeMode, ServiceId};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::container::BridgeConfig;
use crate::environment;
use crate::health::{AggregateSubscription, AggregatorError, StateAggregator};
use crate::parameters::{
    NetworkParametersReader, ParameterError, ParameterVerifier, VerifiedNetworkParameters,
};
use crate::ports::{CollaboratorFactory, TerminationSignal};
use crate::registry::{Subservice, SubserviceError};
use crate::services::AuditService;
use crate::topology::{Topology, TopologyBuilder, TopologyError};

pub use exit::{ExitSignal, ExitStatus, StopReason};

use exit::ExitCell;

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;
const TERMINATED: u8 = 4;

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not running: never started, starting, failed to start, or stopped.
    Stopped,
    /// Started and not yet fully stopped.
    Running,
}

/// Supervisor errors.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// `start()` while starting or running.
    #[error("Supervisor is already running")]
    AlreadyRunning,

    /// `start()` after a completed stop.
    #[error("Supervisor has been stopped and cannot be restarted")]
    Terminated,

    /// Network parameters failed verification.
    #[error("Network parameters rejected: {0}")]
    Parameters(#[from] ParameterError),

    /// The topology could not be wired.
    #[error("Topology construction failed: {0}")]
    Topology(#[from] TopologyError),

    /// The active signal could not be aggregated.
    #[error("Health aggregation failed: {0}")]
    Aggregation(#[from] AggregatorError),

    /// A service failed to start.
    #[error("{service} failed to start: {source}")]
    StartFailed {
        /// The failing service.
        service: ServiceId,
        /// Its error.
        #[source]
        source: SubserviceError,
    },
}

/// Cancels the termination hook task when consumed or dropped.
struct TerminationHook {
    cancel: oneshot::Sender<()>,
}

impl TerminationHook {
    fn register(signal: Arc<dyn TerminationSignal>, supervisor: Weak<Supervisor>) -> Self {
        let (cancel, cancelled) = oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled => {}
                fired = signal.triggered() => match fired {
                    Ok(cause) => {
                        if let Some(supervisor) = supervisor.upgrade() {
                            info!(cause, "Termination requested");
                            supervisor.stop_with(StopReason::TerminationSignal).await;
                        }
                    }
                    Err(e) => warn!(error = %e, "Termination hook failed"),
                },
            }
        });
        Self { cancel }
    }

    fn cancel(self) {
        // The hook task may be the caller; it has already left the select.
        let _ = self.cancel.send(());
    }
}

/// State that exists only while running.
struct Running {
    topology: Topology,
    aggregate: AggregateSubscription,
    watchers: Vec<SignalListener>,
    hook: TerminationHook,
}

/// Progress of a start attempt, for unwinding on failure.
struct Bringup {
    hook: TerminationHook,
    topology: Option<Topology>,
    aggregate: Option<AggregateSubscription>,
    watchers: Vec<SignalListener>,
    started: Vec<Arc<dyn Subservice>>,
}

/// Lifecycle owner of one bridge process.
pub struct Supervisor {
    config: BridgeConfig,
    factory: Arc<dyn CollaboratorFactory>,
    bus: Arc<InMemoryEventBus>,
    verifier: ParameterVerifier,
    phase: AtomicU8,
    pending_stop: Mutex<Option<StopReason>>,
    active: ActiveState,
    _active_watcher: SignalListener,
    running: Mutex<Option<Running>>,
    parameters: Mutex<Option<VerifiedNetworkParameters>>,
    exit: ExitCell,
    this: Weak<Supervisor>,
}

impl Supervisor {
    /// Create a stopped supervisor with its own event bus.
    #[must_use]
    pub fn new(config: BridgeConfig, factory: Arc<dyn CollaboratorFactory>) -> Arc<Self> {
        Self::with_bus(config, factory, Arc::new(InMemoryEventBus::new()))
    }

    /// Create a stopped supervisor publishing on `bus`.
    #[must_use]
    pub fn with_bus(
        config: BridgeConfig,
        factory: Arc<dyn CollaboratorFactory>,
        bus: Arc<InMemoryEventBus>,
    ) -> Arc<Self> {
        let active = ActiveState::new("bridge");
        let publisher = Arc::clone(&bus);
        let active_watcher = active.signal().on_change(move |active| {
            BRIDGE_ACTIVE.set(if active { 1.0 } else { 0.0 });
            publisher.publish(BridgeEvent::BridgeActiveChanged { active });
            info!(active, "Bridge active state changed");
        });

        Arc::new_cyclic(|this| Self {
            config,
            factory,
            bus,
            verifier: ParameterVerifier::new(),
            phase: AtomicU8::new(STOPPED),
            pending_stop: Mutex::new(None),
            active,
            _active_watcher: active_watcher,
            running: Mutex::new(None),
            parameters: Mutex::new(None),
            exit: ExitCell::new(),
            this: Weak::clone(this),
        })
    }

    // =========================================================================
    // START
    // =========================================================================

    /// Verify parameters, build the topology and start every service.
    ///
    /// Fails with [`SupervisorError::AlreadyRunning`] unless stopped. On any
    /// other failure every constructed service is stopped again (in reverse
    /// order), the supervisor stays stopped and the exit signal is not
    /// resolved.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        if let Err(current) =
            self.phase
                .compare_exchange(STOPPED, STARTING, Ordering::AcqRel, Ordering::Acquire)
        {
            return Err(match current {
                TERMINATED => SupervisorError::Terminated,
                _ => SupervisorError::AlreadyRunning,
            });
        }
        metric_inc!(LIFECYCLE_TRANSITIONS, &["start"]);
        let timer = HistogramTimer::new(&STARTUP_DURATION);
        info!(
            mode = %self.config.mode,
            base = %self.config.base_directory.display(),
            "Starting bridge"
        );

        environment::init();
        let hook = TerminationHook::register(self.factory.termination(), Weak::clone(&self.this));
        let mut bringup = Bringup {
            hook,
            topology: None,
            aggregate: None,
            watchers: Vec::new(),
            started: Vec::new(),
        };

        match self.bring_up(&mut bringup).await {
            Ok(()) => {
                let (Some(topology), Some(aggregate)) =
                    (bringup.topology.take(), bringup.aggregate.take())
                else {
                    // bring_up fills both on success
                    self.unwind(bringup).await;
                    return Err(SupervisorError::Aggregation(AggregatorError::NoConstituents));
                };
                *self.running.lock() = Some(Running {
                    topology,
                    aggregate,
                    watchers: std::mem::take(&mut bringup.watchers),
                    hook: bringup.hook,
                });

                let deferred = {
                    let mut pending = self.pending_stop.lock();
                    self.phase.store(RUNNING, Ordering::Release);
                    pending.take()
                };
                timer.observe();
                metric_inc!(LIFECYCLE_TRANSITIONS, &["running"]);
                info!(
                    mode = %self.config.mode,
                    services = ?self.running_services(),
                    "Bridge running"
                );

                if let Some(reason) = deferred {
                    info!(reason = reason.name(), "Running deferred stop");
                    self.stop_with(reason).await;
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Bridge failed to start");
                self.unwind(bringup).await;
                {
                    let mut pending = self.pending_stop.lock();
                    self.phase.store(STOPPED, Ordering::Release);
                    pending.take();
                }
                metric_inc!(LIFECYCLE_TRANSITIONS, &["start_failed"]);
                Err(e)
            }
        }
    }

    async fn bring_up(&self, bringup: &mut Bringup) -> Result<(), SupervisorError> {
        let reader = NetworkParametersReader::new(&self.config.base_directory);
        let trust_roots = self.factory.trust_roots();
        let parameters =
            self.verifier
                .verify_from(&reader, trust_roots.as_ref(), self.config.platform_version)?;
        self.bus.publish(BridgeEvent::ParametersVerified {
            hash: parameters.hash_hex(),
            epoch: parameters.epoch(),
            max_message_size: parameters.max_message_size(),
        });
        *self.parameters.lock() = Some(parameters.clone());

        let audit = Arc::new(AuditService::new(
            Arc::clone(&self.bus),
            self.config.audit.stats_interval(),
        ));
        let topology = TopologyBuilder::new(Arc::clone(&self.factory), Arc::clone(&self.bus))
            .with_retry_interval(self.config.network.reconnect_interval())
            .build(self.config.mode, &parameters, audit)?;
        let services = topology.services();
        bringup.topology = Some(topology);

        bringup.watchers = services
            .iter()
            .map(|service| self.watch_service(service.id(), &service.active()))
            .collect();
        let aggregate = StateAggregator::new(self.config.health.empty_set_policy).observe_into(
            services.iter().map(|s| s.active()).collect(),
            self.active.clone(),
        )?;
        bringup.aggregate = Some(aggregate);

        for service in services {
            let id = service.id();
            // Recorded before start so a partial start is stopped too.
            bringup.started.push(Arc::clone(&service));
            service
                .start()
                .await
                .map_err(|source| SupervisorError::StartFailed {
                    service: id,
                    source,
                })?;
            self.bus.publish(BridgeEvent::ServiceStarted {
                service: id,
                mode: self.config.mode,
            });
        }
        Ok(())
    }

    fn watch_service(&self, service: ServiceId, signal: &ActiveSignal) -> SignalListener {
        let bus = Arc::clone(&self.bus);
        signal.on_change(move |active| {
            SERVICE_ACTIVE
                .with_label_values(&[service.name()])
                .set(if active { 1.0 } else { 0.0 });
            bus.publish(BridgeEvent::ServiceActiveChanged { service, active });
        })
    }

    async fn unwind(&self, bringup: Bringup) {
        bringup.hook.cancel();
        if let Some(aggregate) = &bringup.aggregate {
            aggregate.force_inactive();
        }
        self.stop_services(&bringup.started).await;
        if let Some(aggregate) = bringup.aggregate {
            aggregate.dispose();
        }
        drop(bringup.watchers);
        drop(bringup.topology);
    }

    // =========================================================================
    // STOP
    // =========================================================================

    /// Stop every service in reverse start order and resolve the exit signal.
    ///
    /// A no-op unless running. Safe to call concurrently and from the
    /// termination hook.
    pub async fn stop(&self) {
        self.stop_with(StopReason::Requested).await;
    }

    async fn stop_with(&self, reason: StopReason) {
        loop {
            match self.phase.compare_exchange(
                RUNNING,
                STOPPING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(STARTING) => {
                    let mut pending = self.pending_stop.lock();
                    if self.phase.load(Ordering::Acquire) == STARTING {
                        pending.get_or_insert(reason);
                        info!(reason = reason.name(), "Stop deferred until start completes");
                        return;
                    }
                }
                Err(_) => return,
            }
        }

        metric_inc!(LIFECYCLE_TRANSITIONS, &["stop"]);
        info!(reason = reason.name(), "Stopping bridge");

        let running = self.running.lock().take();
        if let Some(running) = running {
            running.hook.cancel();
            running.aggregate.force_inactive();
            self.stop_services(&running.topology.services()).await;
            running.aggregate.dispose();
            drop(running.watchers);
        }

        self.phase.store(TERMINATED, Ordering::Release);
        metric_inc!(LIFECYCLE_TRANSITIONS, &["stopped"]);
        self.exit.resolve(ExitStatus {
            stopped_at: Utc::now(),
            reason,
        });
        info!(reason = reason.name(), "Bridge stopped");
    }

    async fn stop_services(&self, services: &[Arc<dyn Subservice>]) {
        for service in services.iter().rev() {
            let id = service.id();
            if let Err(e) = service.stop().await {
                warn!(service = %id, error = %e, "Service failed to stop cleanly");
                self.bus.publish(BridgeEvent::CriticalError {
                    service: id,
                    error: e.to_string(),
                });
            }
            self.bus.publish(BridgeEvent::ServiceStopped { service: id });
        }
    }

    // =========================================================================
    // OBSERVATION
    // =========================================================================

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        match self.phase.load(Ordering::Acquire) {
            RUNNING | STOPPING => LifecycleState::Running,
            _ => LifecycleState::Stopped,
        }
    }

    /// Whether a completed stop has made this supervisor unusable.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.phase.load(Ordering::Acquire) == TERMINATED
    }

    /// Whether every service is currently active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_active()
    }

    /// The aggregate active signal. Lives as long as the supervisor.
    #[must_use]
    pub fn active_signal(&self) -> ActiveSignal {
        self.active.signal()
    }

    /// Signal resolving once the stop sequence completes.
    #[must_use]
    pub fn exit_signal(&self) -> ExitSignal {
        self.exit.signal(Weak::clone(&self.this))
    }

    /// Event bus every service publishes on.
    #[must_use]
    pub fn event_bus(&self) -> Arc<InMemoryEventBus> {
        Arc::clone(&self.bus)
    }

    /// Configured mode.
    #[must_use]
    pub fn mode(&self) -> BridgeMode {
        self.config.mode
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Parameters verified by the last start that got that far.
    #[must_use]
    pub fn verified_parameters(&self) -> Option<VerifiedNetworkParameters> {
        self.parameters.lock().clone()
    }

    /// Services of the running topology, in start order.
    #[must_use]
    pub fn running_services(&self) -> Vec<ServiceId> {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.topology.service_ids())
            .unwrap_or_default()
    }

    /// Run `f` against the running topology.
    pub fn with_topology<R>(&self, f: impl FnOnce(&Topology) -> R) -> Option<R> {
        self.running.lock().as_ref().map(|running| f(&running.topology))
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("mode", &self.config.mode)
            .field("state", &self.state())
            .field("active", &self.is_active())
            .finish()
    }
}
