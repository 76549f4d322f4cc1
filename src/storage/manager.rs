//! Connection manager.
//!
//! Opens every configured store concurrently on the blocking pool, installs
//! the drivers and resolves the shared readiness barrier. A single store
//! failing to open fails readiness for all of them.

use futures::future::join_all;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::driver::Connector;
use super::readiness::{ReadinessResolver, Readiness, ReadyState};
use super::store::Store;
use super::StoreError;
use crate::failure::{run_recorder, FailureBus, FailureLog, FailureNotice, FailureReporter};
use crate::lifecycle::ShutdownState;

/// Primary store.
pub const MAIN: &str = "main";
/// Image/asset cache store.
pub const IMAGE: &str = "image";
/// Guild/state store; holds the failure log by default.
pub const GUILD: &str = "guild";

/// Name and file of one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    pub name: String,
    pub path: PathBuf,
}

impl StoreSpec {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// The three standard stores under `data_dir`.
    pub fn standard_set(data_dir: &Path) -> Vec<Self> {
        vec![
            Self::new(MAIN, data_dir.join("database.sqlite")),
            Self::new(IMAGE, data_dir.join("image_cache.db")),
            Self::new(GUILD, data_dir.join("guild.db")),
        ]
    }
}

/// Storage-wide options.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Window within which identical failures share one log entry
    pub dedup_window: Duration,
    /// Capacity of the failure notification bus
    pub notify_capacity: usize,
    /// Store that keeps the failure log
    pub failure_store: String,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            dedup_window: crate::failure::DEFAULT_DEDUP_WINDOW,
            notify_capacity: 256,
            failure_store: GUILD.into(),
        }
    }
}

/// Owner of every store handle.
pub struct Storage {
    pub(crate) stores: Vec<Store>,
    pub(crate) readiness: Readiness,
    pub(crate) shutdown: ShutdownState,
    pub(crate) failures: Arc<FailureLog>,
    pub(crate) recorder: Mutex<Option<JoinHandle<()>>>,
    pub(crate) background_cancel: CancellationToken,
}

impl Storage {
    /// Start opening `specs` and return immediately.
    ///
    /// Operations issued before every store is open wait on the readiness
    /// barrier. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateStore` for repeated names and `UnknownStore` if the
    /// failure store is not among `specs`.
    pub fn open(
        specs: Vec<StoreSpec>,
        connector: Arc<dyn Connector>,
        options: StorageOptions,
    ) -> Result<Self, StoreError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(StoreError::DuplicateStore(spec.name.clone()));
            }
        }
        if !seen.contains(options.failure_store.as_str()) {
            return Err(StoreError::UnknownStore(options.failure_store));
        }

        let (resolver, readiness) = Readiness::new();
        let shutdown = ShutdownState::new();
        let (reporter, reports) = FailureReporter::channel();

        let stores: Vec<Store> = specs
            .iter()
            .map(|spec| Store::new(spec, readiness.clone(), shutdown.clone(), reporter.clone()))
            .collect();

        let failure_store = stores
            .iter()
            .find(|s| s.name() == options.failure_store)
            .cloned()
            .ok_or_else(|| StoreError::UnknownStore(options.failure_store.clone()))?;
        let failures = Arc::new(FailureLog::new(
            failure_store,
            shutdown.clone(),
            FailureBus::new(options.notify_capacity),
            options.dedup_window,
        ));

        let background_cancel = CancellationToken::new();
        let recorder = tokio::spawn(run_recorder(
            reports,
            Arc::clone(&failures),
            background_cancel.clone(),
        ));
        tokio::spawn(open_all(stores.clone(), connector, resolver));

        Ok(Self {
            stores,
            readiness,
            shutdown,
            failures,
            recorder: Mutex::new(Some(recorder)),
            background_cancel,
        })
    }

    /// Open `specs` and wait until every store is ready.
    ///
    /// On failure the stores that did open are closed before returning.
    pub async fn connect(
        specs: Vec<StoreSpec>,
        connector: Arc<dyn Connector>,
        options: StorageOptions,
    ) -> Result<Self, StoreError> {
        let storage = Self::open(specs, connector, options)?;
        if let Err(e) = storage.ready().await {
            storage.close_all().await;
            return Err(e);
        }
        Ok(storage)
    }

    /// Wait for the readiness barrier.
    pub async fn ready(&self) -> Result<(), StoreError> {
        self.readiness.wait().await
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Look up a store by name.
    pub fn store(&self, name: &str) -> Result<&Store, StoreError> {
        self.stores
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| StoreError::UnknownStore(name.to_owned()))
    }

    pub fn stores(&self) -> &[Store] {
        &self.stores
    }

    pub fn shutdown_state(&self) -> &ShutdownState {
        &self.shutdown
    }

    pub fn failure_log(&self) -> &Arc<FailureLog> {
        &self.failures
    }

    /// Subscribe to failure notices.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<FailureNotice> {
        self.failures.bus().subscribe()
    }
}

/// Open all stores concurrently and resolve readiness.
async fn open_all(stores: Vec<Store>, connector: Arc<dyn Connector>, resolver: ReadinessResolver) {
    let started = Instant::now();
    let opens = stores.iter().map(|store| {
        let spec = StoreSpec::new(store.name(), store.path());
        let connector = Arc::clone(&connector);
        tokio::task::spawn_blocking(move || connector.open(&spec))
    });
    let results = join_all(opens).await;

    let mut failure: Option<(String, String)> = None;
    for (store, joined) in stores.iter().zip(results) {
        match joined {
            Ok(Ok(driver)) => {
                store.install_driver(driver);
                tracing::info!(store = %store.name(), path = %store.path().display(), "Store opened");
            }
            Ok(Err(e)) => {
                tracing::error!(store = %store.name(), error = %e, "Failed to open store");
                failure.get_or_insert_with(|| (store.name().to_owned(), e.to_string()));
            }
            Err(e) => {
                tracing::error!(store = %store.name(), error = %e, "Store open task failed");
                failure.get_or_insert_with(|| (store.name().to_owned(), e.to_string()));
            }
        }
    }

    match failure {
        None => {
            tracing::info!(
                stores = stores.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "All stores ready"
            );
            resolver.resolve(ReadyState::Ready);
        }
        Some((store, message)) => resolver.resolve(ReadyState::Failed { store, message }),
    }
}
