//! Notification bus for store failures.
//!
//! tokio::sync::broadcast fans each persisted failure out to whoever
//! escalates it. This crate only emits; thresholds and formatting live with
//! the subscriber.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};

/// Notification emitted after a failure has been recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    /// Store the failure happened in
    pub store: String,
    /// Driver error message, the dedup key
    pub message: String,
    /// Debug rendering of the driver error
    pub stack: Option<String>,
    /// Occurrence count after recording; `None` if persisting failed
    pub occurrences: Option<i64>,
}

/// Broadcast bus for failure notices.
#[derive(Clone)]
pub struct FailureBus {
    sender: Sender<FailureNotice>,
}

impl FailureBus {
    /// Create a new bus with the given capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of buffered notices.
    ///   Older notices are dropped if a subscriber falls behind.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to notices emitted from now on.
    pub fn subscribe(&self) -> Receiver<FailureNotice> {
        self.sender.subscribe()
    }

    /// Emit a notice.
    ///
    /// Returns the number of subscribers that received it.
    pub fn notify(&self, notice: FailureNotice) -> usize {
        // send() errs when nobody is subscribed, which is fine
        self.sender.send(notice).unwrap_or(0)
    }

    /// Get the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FailureBus {
    fn default() -> Self {
        Self::new(256)
    }
}
