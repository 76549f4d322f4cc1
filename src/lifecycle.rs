//! Shutdown state and controller.
//!
//! Shutdown runs in three steps driven by the process owner:
//! 1. [`Storage::begin_shutdown`] stops failure logging.
//! 2. [`Storage::cancel_all_operations`] turns new writes into
//!    `StoreError::Shutdown` and new reads into empty results.
//! 3. [`Storage::close_all`] closes every store, best effort.
//!
//! Cancellation is a flag checked when an operation starts; operations
//! already past the check finish normally.

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use crate::storage::Storage;

#[derive(Debug, Default)]
struct Flags {
    shutting_down: AtomicBool,
    cancelled: AtomicBool,
}

/// Shared shutdown flags, injected into every store and the failure log.
#[derive(Debug, Clone, Default)]
pub struct ShutdownState {
    flags: Arc<Flags>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark shutdown as begun. Idempotent.
    pub fn begin(&self) {
        self.flags.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Cancel all operations that have not started yet. Implies `begin`.
    pub fn cancel(&self) {
        self.flags.shutting_down.store(true, Ordering::SeqCst);
        self.flags.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.flags.shutting_down.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.cancelled.load(Ordering::SeqCst)
    }
}

impl Storage {
    /// Flag shutdown so failures stop being persisted or notified.
    pub fn begin_shutdown(&self) {
        self.shutdown.begin();
        tracing::info!("Storage shutdown begun");
    }

    /// Replace every store's operations with shutdown stubs.
    ///
    /// Handles stay open; in-flight calls complete.
    pub fn cancel_all_operations(&self) {
        self.shutdown.cancel();
        tracing::info!(stores = self.stores.len(), "All further store operations cancelled");
    }

    /// Close every opened store.
    ///
    /// Cancels operations first if that has not happened. A store that fails
    /// to close is logged and skipped; this never fails.
    pub async fn close_all(&self) {
        self.shutdown.cancel();

        self.background_cancel.cancel();
        let recorder = self
            .recorder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = recorder {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Failure recorder task ended abnormally");
            }
        }

        let closes = self.stores.iter().filter_map(|store| {
            let driver = store.driver()?;
            let name = store.name().to_owned();
            Some(async move {
                match tokio::task::spawn_blocking(move || driver.close()).await {
                    Ok(Ok(())) => tracing::info!(store = %name, "Store closed"),
                    Ok(Err(e)) => tracing::error!(store = %name, error = %e, "Error closing store"),
                    Err(e) => tracing::error!(store = %name, error = %e, "Close task failed"),
                }
            })
        });
        join_all(closes).await;
    }
}
