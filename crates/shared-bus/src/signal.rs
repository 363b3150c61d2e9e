//! # Active Signals
//!
//! A boolean "is this service active" cell with two read paths:
//!
//! - **Synchronous listeners** (`on_change`) run inside `ActiveState::set`,
//!   before it returns. Aggregators use this so a combined signal is never
//!   behind its constituents.
//! - **Async observers** (`wait_for`, `stream`) built on `tokio::sync::watch`,
//!   for tasks that want to wait for a transition.
//!
//! Listeners must not call `set` on the signal they listen to.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

struct Shared {
    name: String,
    tx: watch::Sender<bool>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

impl Shared {
    fn remove_listener(&self, id: u64) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }
}

/// Writer half of an active signal, owned by the service it describes.
#[derive(Clone)]
pub struct ActiveState {
    shared: Arc<Shared>,
}

impl ActiveState {
    /// Create an inactive signal.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_initial(name, false)
    }

    /// Create a signal with an explicit initial value.
    #[must_use]
    pub fn with_initial(name: impl Into<String>, initial: bool) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                tx,
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    /// Set the value. Listeners run before this returns, and only on change.
    ///
    /// Returns whether the value changed.
    pub fn set(&self, active: bool) -> bool {
        let changed = self.shared.tx.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });

        if changed {
            // Snapshot so listeners may register or drop guards while running.
            let listeners: Vec<Listener> = self
                .shared
                .listeners
                .lock()
                .iter()
                .map(|(_, l)| Arc::clone(l))
                .collect();
            for listener in listeners {
                listener(active);
            }
        }
        changed
    }

    /// Current value.
    #[must_use]
    pub fn is_active(&self) -> bool {
        *self.shared.tx.borrow()
    }

    /// Read-only handle.
    #[must_use]
    pub fn signal(&self) -> ActiveSignal {
        ActiveSignal {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl fmt::Debug for ActiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveState")
            .field("name", &self.shared.name)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Reader half of an active signal.
#[derive(Clone)]
pub struct ActiveSignal {
    shared: Arc<Shared>,
}

impl ActiveSignal {
    /// Name of the signal's owner.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current value.
    #[must_use]
    pub fn is_active(&self) -> bool {
        *self.shared.tx.borrow()
    }

    /// Register a synchronous change listener.
    ///
    /// The listener runs on the thread calling `ActiveState::set`, after the
    /// new value is visible to readers. It is removed when the returned guard
    /// is dropped or `remove`d.
    #[must_use = "the listener is removed when the guard is dropped"]
    pub fn on_change<F>(&self, listener: F) -> SignalListener
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.lock().push((id, Arc::new(listener)));
        SignalListener {
            shared: Arc::clone(&self.shared),
            id,
            removed: AtomicBool::new(false),
        }
    }

    /// Watch receiver for async consumers.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.tx.subscribe()
    }

    /// Stream of values: the current value first, then every change.
    #[must_use]
    pub fn stream(&self) -> WatchStream<bool> {
        WatchStream::new(self.subscribe())
    }

    /// Wait until the signal equals `active`.
    pub async fn wait_for(&self, active: bool) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self.shared`, which we hold.
        let _ = rx.wait_for(|value| *value == active).await;
    }

    /// Number of registered synchronous listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }
}

impl fmt::Debug for ActiveSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSignal")
            .field("name", &self.shared.name)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Registration guard for an `on_change` listener.
pub struct SignalListener {
    shared: Arc<Shared>,
    id: u64,
    removed: AtomicBool,
}

impl SignalListener {
    /// Detach the listener. Idempotent.
    pub fn remove(&self) {
        if !self.removed.swap(true, Ordering::AcqRel) {
            self.shared.remove_listener(self.id);
        }
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.remove();
    }
}
