//! Per-store query facade.
//!
//! Every operation awaits the readiness barrier, then checks the
//! cancellation flag, then hands the driver call to the blocking pool.
//! Driver failures are returned to the caller and forwarded to the failure
//! recorder without waiting on it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use super::driver::{Driver, DriverError, ExecMeta, Row};
use super::manager::StoreSpec;
use super::readiness::Readiness;
use super::{StoreError, Value};
use crate::failure::{FailureReport, FailureReporter};
use crate::lifecycle::ShutdownState;
use crate::observability::metrics;

/// Handle to one named store. Cheap to clone; all clones share the same
/// driver, transaction lock and readiness barrier.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    name: String,
    path: PathBuf,
    driver: OnceLock<Arc<dyn Driver>>,
    readiness: Readiness,
    shutdown: ShutdownState,
    reporter: FailureReporter,
    tx_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("path", &self.inner.path)
            .field("opened", &self.inner.driver.get().is_some())
            .finish()
    }
}

impl Store {
    pub(crate) fn new(
        spec: &StoreSpec,
        readiness: Readiness,
        shutdown: ShutdownState,
        reporter: FailureReporter,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                name: spec.name.clone(),
                path: spec.path.clone(),
                driver: OnceLock::new(),
                readiness,
                shutdown,
                reporter,
                tx_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub(crate) fn install_driver(&self, driver: Arc<dyn Driver>) -> bool {
        self.inner.driver.set(driver).is_ok()
    }

    pub(crate) fn driver(&self) -> Option<Arc<dyn Driver>> {
        self.inner.driver.get().cloned()
    }

    pub(crate) fn tx_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.inner.tx_lock
    }

    pub(super) fn shutdown_error(&self) -> StoreError {
        StoreError::Shutdown {
            store: self.inner.name.clone(),
        }
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Wait for readiness and check cancellation.
    ///
    /// Returns `None` once operations are cancelled; callers turn that into
    /// an empty read or a `Shutdown` error.
    pub(super) async fn admit(&self) -> Result<Option<Arc<dyn Driver>>, StoreError> {
        if self.is_cancelled() {
            return Ok(None);
        }
        self.inner.readiness.wait().await?;
        if self.is_cancelled() {
            return Ok(None);
        }
        self.driver().map(Some).ok_or_else(|| StoreError::Connection {
            store: self.inner.name.clone(),
            message: "driver missing after readiness".into(),
        })
    }

    /// Run one driver call on the blocking pool.
    pub(super) async fn call<T, F>(
        &self,
        driver: Arc<dyn Driver>,
        kind: &'static str,
        report: bool,
        op: F,
    ) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Driver) -> Result<T, DriverError> + Send + 'static,
    {
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || op(driver.as_ref()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(value) => {
                metrics::record_operation(&self.inner.name, kind, true, elapsed);
                Ok(value)
            }
            Err(source) => {
                metrics::record_operation(&self.inner.name, kind, false, elapsed);
                if report {
                    self.inner
                        .reporter
                        .report(FailureReport::from_driver_error(&self.inner.name, &source));
                }
                Err(StoreError::Query {
                    store: self.inner.name.clone(),
                    source,
                })
            }
        }
    }

    /// Run a write-style statement.
    #[tracing::instrument(level = "debug", skip(self, params), fields(store = %self.name()))]
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecMeta, StoreError> {
        self.execute_inner(sql, params, true).await
    }

    /// Run parameterless SQL, possibly several statements (DDL, pragmas).
    #[tracing::instrument(level = "debug", skip(self), fields(store = %self.name()))]
    pub async fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.execute_batch_inner(sql, true).await
    }

    /// Run a query and collect every row. Empty after cancellation.
    #[tracing::instrument(level = "debug", skip(self, params), fields(store = %self.name()))]
    pub async fn query_many(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StoreError> {
        self.query_inner(sql, params, true, false).await
    }

    /// Run a query and return its first row, or `None` when there is none.
    #[tracing::instrument(level = "debug", skip(self, params), fields(store = %self.name()))]
    pub async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, StoreError> {
        Ok(self.query_inner(sql, params, true, false).await?.into_iter().next())
    }

    pub(crate) async fn execute_quiet(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<ExecMeta, StoreError> {
        self.execute_inner(sql, params, false).await
    }

    pub(crate) async fn execute_batch_quiet(&self, sql: &str) -> Result<(), StoreError> {
        self.execute_batch_inner(sql, false).await
    }

    pub(crate) async fn query_many_quiet(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Row>, StoreError> {
        self.query_inner(sql, params, false, false).await
    }

    /// First row read on the writer connection. Callers hold `tx_lock`.
    pub(crate) async fn query_one_writer_quiet(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Row>, StoreError> {
        Ok(self.query_inner(sql, params, false, true).await?.into_iter().next())
    }

    async fn execute_inner(
        &self,
        sql: &str,
        params: &[Value],
        report: bool,
    ) -> Result<ExecMeta, StoreError> {
        let Some(driver) = self.admit().await? else {
            return Err(self.shutdown_error());
        };
        let sql = sql.to_owned();
        let params = params.to_vec();
        self.call(driver, "execute", report, move |d| d.execute(&sql, &params))
            .await
    }

    async fn execute_batch_inner(&self, sql: &str, report: bool) -> Result<(), StoreError> {
        let Some(driver) = self.admit().await? else {
            return Err(self.shutdown_error());
        };
        let sql = sql.to_owned();
        self.call(driver, "exec", report, move |d| d.execute_batch(&sql))
            .await
    }

    async fn query_inner(
        &self,
        sql: &str,
        params: &[Value],
        report: bool,
        on_writer: bool,
    ) -> Result<Vec<Row>, StoreError> {
        let Some(driver) = self.admit().await? else {
            return Ok(Vec::new());
        };
        let sql = sql.to_owned();
        let params = params.to_vec();
        self.call(driver, "query", report, move |d| {
            if on_writer {
                d.query_writer(&sql, &params)
            } else {
                d.query(&sql, &params)
            }
        })
        .await
    }
}
