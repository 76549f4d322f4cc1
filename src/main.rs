//! Multistore: multi-database SQLite storage host.
//!
//! # Usage
//!
//! ```bash
//! multistore --data-dir ./data --log-level info
//! ```
//!
//! Environment variables can also be used:
//! - `MULTISTORE_DATA_DIR`: Data directory for the store files
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context;
use multistore::config::Config;
use multistore::observability::metrics::init_metrics_with_endpoint;
use multistore::observability::tracing::init_tracing;
use multistore::storage::Storage;
use std::fs;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
  Multistore v{} - SQLite storage host

  Configuration:
    Data Dir:      {}
    Busy Timeout:  {} ms
    Dedup Window:  {} s
    Log Level:     {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.data_dir.display(),
        config.busy_timeout_ms,
        config.dedup_window_secs,
        config.log_level
    );
}

/// Log every failure notice until the bus closes.
fn spawn_failure_logger(storage: &Storage) {
    let mut notices = storage.subscribe_failures();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => tracing::warn!(
                    store = %notice.store,
                    error = %notice.message,
                    occurrences = ?notice.occurrences,
                    "Store failure notice"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Failure notice subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    // Initialize tracing/logging
    init_tracing(&config.log_level, config.log_format);

    // Initialize metrics (with optional OTLP export)
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    // Ensure data directory exists
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    print_banner(&config);

    // A store that cannot open is fatal
    let storage = Storage::connect(
        config.store_specs(),
        Arc::new(config.connector()),
        config.storage_options(),
    )
    .await
    .context("opening stores")?;
    spawn_failure_logger(&storage);

    // Create shutdown signal channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Spawn signal handler task
    tokio::spawn(async move {
        // Wait for SIGTERM or SIGINT (Ctrl+C)
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating shutdown...");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl+C");
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }

        let _ = shutdown_tx.send(true);
    });

    let _ = shutdown_rx.changed().await;

    storage.begin_shutdown();
    storage.cancel_all_operations();
    // Let in-flight operations drain before closing handles
    tokio::time::sleep(config.shutdown_grace()).await;
    storage.close_all().await;

    tracing::info!("Multistore shutdown complete");
    Ok(())
}
