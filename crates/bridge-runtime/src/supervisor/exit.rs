//! Write-once exit signal.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::Supervisor;

/// Why a supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// The termination hook fired.
    TerminationSignal,
}

impl StopReason {
    /// Label for logs and metrics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::TerminationSignal => "termination_signal",
        }
    }
}

/// Outcome carried by a resolved [`ExitSignal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// When the stop sequence finished.
    pub stopped_at: DateTime<Utc>,
    /// What triggered it.
    pub reason: StopReason,
}

/// Writer side, owned by the supervisor.
pub(crate) struct ExitCell {
    tx: watch::Sender<Option<ExitStatus>>,
    resolutions: Arc<AtomicU64>,
}

impl ExitCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            resolutions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Resolve with `status`. Only the first call has any effect.
    pub(crate) fn resolve(&self, status: ExitStatus) -> bool {
        let resolved = self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(status);
            true
        });
        if resolved {
            self.resolutions.fetch_add(1, Ordering::AcqRel);
        }
        resolved
    }

    pub(crate) fn signal(&self, supervisor: Weak<Supervisor>) -> ExitSignal {
        ExitSignal {
            rx: self.tx.subscribe(),
            resolutions: Arc::clone(&self.resolutions),
            supervisor,
        }
    }
}

/// Resolves once, when the supervisor's stop sequence has completed.
///
/// Cloneable; every clone observes the same resolution.
#[derive(Clone)]
pub struct ExitSignal {
    rx: watch::Receiver<Option<ExitStatus>>,
    resolutions: Arc<AtomicU64>,
    supervisor: Weak<Supervisor>,
}

impl ExitSignal {
    /// Wait for the stop sequence to finish.
    ///
    /// Returns `None` if the supervisor was dropped without ever stopping.
    pub async fn wait(&self) -> Option<ExitStatus> {
        let mut rx = self.rx.clone();
        let status = rx.wait_for(Option::is_some).await.ok()?.clone();
        status
    }

    /// The status, if already resolved.
    #[must_use]
    pub fn status(&self) -> Option<ExitStatus> {
        self.rx.borrow().clone()
    }

    /// Whether the signal has resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// How many times the signal was resolved. Never more than one.
    #[must_use]
    pub fn resolutions(&self) -> u64 {
        self.resolutions.load(Ordering::Acquire)
    }

    /// The supervisor this signal belongs to, while it is alive.
    #[must_use]
    pub fn supervisor(&self) -> Option<Arc<Supervisor>> {
        self.supervisor.upgrade()
    }
}

impl fmt::Debug for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExitSignal")
            .field("status", &self.status())
            .field("resolutions", &self.resolutions())
            .finish()
    }
}
