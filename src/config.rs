//! Configuration parsing for the multistore binary.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for quick start

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::observability::tracing::LogFormat;
use crate::storage::{SqliteConnector, StorageOptions, StoreSpec};

/// Multistore: multi-database SQLite storage with serialized transactions.
#[derive(Parser, Debug, Clone)]
#[command(name = "multistore")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Data directory holding the store files
    #[arg(short, long, env = "MULTISTORE_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "MULTISTORE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Busy timeout applied to every connection, in milliseconds
    #[arg(long, env = "MULTISTORE_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// Size of each store's reader connection pool
    #[arg(long, env = "MULTISTORE_READER_POOL_SIZE", default_value_t = 4)]
    pub reader_pool_size: u32,

    /// Window within which identical failures share one log entry, in seconds
    #[arg(long, env = "MULTISTORE_DEDUP_WINDOW_SECS", default_value_t = 1800)]
    pub dedup_window_secs: u64,

    /// Capacity of the failure notification channel
    #[arg(long, env = "MULTISTORE_NOTIFY_CHANNEL_SIZE", default_value_t = 256)]
    pub notify_channel_size: usize,

    /// Pause between cancelling operations and closing stores, in milliseconds
    #[arg(long, env = "MULTISTORE_SHUTDOWN_GRACE_MS", default_value_t = 2000)]
    pub shutdown_grace_ms: u64,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The standard main, image and guild stores under `data_dir`.
    pub fn store_specs(&self) -> Vec<StoreSpec> {
        StoreSpec::standard_set(&self.data_dir)
    }

    pub fn connector(&self) -> SqliteConnector {
        SqliteConnector::new(
            Duration::from_millis(self.busy_timeout_ms),
            self.reader_pool_size,
        )
    }

    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            dedup_window: Duration::from_secs(self.dedup_window_secs),
            notify_capacity: self.notify_channel_size,
            ..StorageOptions::default()
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Create a default configuration for testing.
    #[cfg(test)]
    pub fn test_config(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            log_level: "debug".into(),
            shutdown_grace_ms: 0,
            reader_pool_size: 2,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            log_level: "info".into(),
            log_format: LogFormat::Text,
            busy_timeout_ms: 5000,
            reader_pool_size: 4,
            dedup_window_secs: 1800,
            notify_channel_size: 256,
            shutdown_grace_ms: 2000,
            otel_endpoint: None,
        }
    }
}
