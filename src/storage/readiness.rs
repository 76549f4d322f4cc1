//! Readiness barrier shared by every store.
//!
//! Uses tokio::sync::watch as a single-resolution broadcast: the opener
//! resolves it once, any number of waiters observe the outcome.

use tokio::sync::watch;

use super::StoreError;

/// Outcome of opening all stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Pending,
    Ready,
    Failed { store: String, message: String },
}

/// Waiter side of the barrier. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Readiness {
    rx: watch::Receiver<ReadyState>,
}

/// Resolver side of the barrier, held by the opener task.
#[derive(Debug)]
pub struct ReadinessResolver {
    tx: watch::Sender<ReadyState>,
}

impl Readiness {
    /// Create an unresolved barrier.
    pub fn new() -> (ReadinessResolver, Self) {
        let (tx, rx) = watch::channel(ReadyState::Pending);
        (ReadinessResolver { tx }, Self { rx })
    }

    /// Wait until the barrier resolves.
    ///
    /// Returns `StoreError::Connection` if any store failed to open or the
    /// resolver was dropped without resolving.
    pub async fn wait(&self) -> Result<(), StoreError> {
        let mut rx = self.rx.clone();
        let state = rx
            .wait_for(|state| *state != ReadyState::Pending)
            .await
            .map(|state| state.clone())
            .unwrap_or(ReadyState::Pending);
        match state {
            ReadyState::Ready => Ok(()),
            ReadyState::Failed { store, message } => Err(StoreError::Connection { store, message }),
            // only reachable when the resolver is dropped unresolved
            ReadyState::Pending => Err(StoreError::Connection {
                store: "*".into(),
                message: "store opener exited before resolving readiness".into(),
            }),
        }
    }

    /// Current state without waiting.
    pub fn state(&self) -> ReadyState {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.rx.borrow() == ReadyState::Ready
    }
}

impl ReadinessResolver {
    /// Resolve the barrier. Later calls are ignored.
    pub fn resolve(&self, state: ReadyState) {
        self.tx.send_if_modified(|current| {
            if *current == ReadyState::Pending && state != ReadyState::Pending {
                *current = state;
                true
            } else {
                false
            }
        });
    }
}
