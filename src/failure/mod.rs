//! Failure recording infrastructure.
//!
//! Provides:
//! - A fire-and-forget reporter the query facade hands failures to
//! - A background recorder draining reports into the failure log
//! - Windowed dedup of identical failures
//! - A notification bus for the external escalation policy

pub mod log;
pub mod notify;

pub use log::{ErrorLogEntry, FailureLog, DEFAULT_DEDUP_WINDOW};
pub use notify::{FailureBus, FailureNotice};

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::storage::DriverError;

/// A failure forwarded by the facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub store: String,
    pub message: String,
    pub stack: Option<String>,
}

impl FailureReport {
    pub fn new(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Build a report from a driver error, keeping its debug form as the stack.
    pub fn from_driver_error(store: &str, error: &DriverError) -> Self {
        Self {
            store: store.to_owned(),
            message: error.to_string(),
            stack: Some(format!("{error:?}")),
        }
    }
}

/// Sending half held by every store. Never blocks the caller.
#[derive(Debug, Clone)]
pub struct FailureReporter {
    tx: mpsc::UnboundedSender<FailureReport>,
}

impl FailureReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FailureReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn report(&self, report: FailureReport) {
        if self.tx.send(report).is_err() {
            tracing::debug!("Failure recorder stopped; report dropped");
        }
    }
}

/// Drain reports into the log until cancelled or every reporter is gone.
pub async fn run_recorder(
    mut reports: mpsc::UnboundedReceiver<FailureReport>,
    log: Arc<FailureLog>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            report = reports.recv() => match report {
                Some(report) => log.record(&report).await,
                None => break,
            },
        }
    }
    tracing::debug!("Failure recorder stopped");
}
