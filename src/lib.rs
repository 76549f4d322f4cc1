//! Multistore: a multi-database SQLite storage layer.
//!
//! Multistore owns several independently opened SQLite stores and gives every
//! caller the same guarantees against each of them: nothing runs before all
//! stores are open, transactions are serialized per store, repeated failures
//! are collapsed into counted log entries, and shutdown degrades in-flight
//! callers instead of crashing them.
//!
//! # Architecture
//!
//! - **WAL-mode stores**: one writer connection plus a read-only reader pool per store
//! - **Readiness barrier**: a single broadcast signal every operation awaits
//! - **Per-store transactions**: BEGIN/COMMIT serialized by an async mutex
//! - **Failure dedup**: identical messages within a window increment one entry
//! - **Cooperative shutdown**: flag-checked stubs, then best-effort close
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`failure`]: Failure log and notification bus
//! - [`lifecycle`]: Shutdown state and controller
//! - [`observability`]: Metrics and tracing setup
//! - [`settings`]: Persisted key-value settings
//! - [`storage`]: Connection manager, query facade and transactions

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::store::Store is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod config;
pub mod failure;
pub mod lifecycle;
pub mod observability;
pub mod settings;
pub mod storage;

pub use failure::{FailureBus, FailureLog, FailureNotice, FailureReport};
pub use lifecycle::ShutdownState;
pub use settings::Settings;
pub use storage::{
    Connector, Driver, DriverError, ExecMeta, Row, SqliteConnector, Statement, Storage,
    StorageOptions, Store, StoreError, StoreSpec, Value,
};

/// Get the current Unix timestamp in seconds.
#[must_use]
pub fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
