//! SQLite storage layer.
//!
//! Provides:
//! - Concurrent opening of named stores with WAL and busy timeout
//! - A readiness barrier awaited by every operation
//! - The per-store query facade
//! - Mutex-serialized transactions
//! - Read connection pools for facade queries

pub mod driver;
pub mod manager;
pub mod reader;
pub mod readiness;
pub mod schema;
pub mod store;
pub mod transaction;

pub use driver::{Connector, Driver, DriverError, ExecMeta, Row, SqliteConnector, SqliteDriver};
pub use manager::{Storage, StorageOptions, StoreSpec};
pub use readiness::{ReadyState, Readiness};
pub use rusqlite::types::Value;
pub use store::Store;
pub use transaction::Statement;

use thiserror::Error;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A store failed to open. Fatal at startup.
    #[error("failed to open store '{store}': {message}")]
    Connection { store: String, message: String },

    /// A single statement or query failed.
    #[error("query failed in store '{store}': {source}")]
    Query {
        store: String,
        #[source]
        source: DriverError,
    },

    /// Synthetic failure returned by write operations after cancellation.
    #[error("store '{store}' is shutting down; operation cancelled")]
    Shutdown { store: String },

    #[error("unknown store '{0}'")]
    UnknownStore(String),

    #[error("store '{0}' is configured more than once")]
    DuplicateStore(String),

    /// A blocking driver task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// True for the synthetic post-cancellation error, which callers may
    /// ignore during teardown.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown { .. })
    }

    /// Name of the store the error belongs to, if any.
    pub fn store(&self) -> Option<&str> {
        match self {
            Self::Connection { store, .. } | Self::Query { store, .. } | Self::Shutdown { store } => {
                Some(store)
            }
            Self::UnknownStore(name) | Self::DuplicateStore(name) => Some(name),
            Self::Task(_) => None,
        }
    }

    /// The driver error behind a query failure.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Query { source, .. } => Some(source),
            _ => None,
        }
    }
}
