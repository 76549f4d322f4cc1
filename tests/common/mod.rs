//! Test utilities for multistore integration tests.
//!
//! Provides:
//! - Temporary data directory fixtures
//! - A recording driver that logs every call it receives
//! - Connectors that can hold a store's open, fail it, or inject faults
//!   into real SQLite stores

#![allow(dead_code)]

use multistore::storage::{
    Connector, Driver, DriverError, ExecMeta, Row, SqliteConnector, Storage, StorageOptions,
    StoreSpec, Value,
};
use rusqlite::ffi;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Test fixture that manages a temporary data directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    pub temp_dir: TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        multistore::observability::tracing::init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        Self { temp_dir }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// The standard main/image/guild stores in this fixture's directory.
    pub fn specs(&self) -> Vec<StoreSpec> {
        StoreSpec::standard_set(self.temp_dir.path())
    }

    /// Open real SQLite stores and wait for readiness.
    pub async fn connect(&self) -> Storage {
        self.connect_with(Arc::new(sqlite_connector())).await
    }

    pub async fn connect_with(&self, connector: Arc<dyn Connector>) -> Storage {
        Storage::connect(self.specs(), connector, StorageOptions::default())
            .await
            .expect("stores should open")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sqlite_connector() -> SqliteConnector {
    SqliteConnector::new(Duration::from_millis(5000), 2)
}

/// Build a SQLite failure carrying `message`, as the driver would report it.
pub fn sqlite_failure(code: i32, message: &str) -> DriverError {
    DriverError::Sqlite(rusqlite::Error::SqliteFailure(
        ffi::Error::new(code),
        Some(message.to_owned()),
    ))
}

pub fn disk_io_error() -> DriverError {
    sqlite_failure(ffi::SQLITE_IOERR, "disk I/O error")
}

/// Calls received by recording drivers, in arrival order.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn push(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == entry)
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.calls.lock().unwrap().iter().position(|c| c == entry)
    }
}

/// Driver that records every call as `"<store>: <sql>"` and never touches a file.
///
/// SQL containing `FAIL` fails with a disk I/O error; SQL listed in `delays`
/// sleeps before returning. Calls are logged on arrival and never serialized,
/// so overlapping calls show up interleaved.
pub struct RecordingDriver {
    name: String,
    log: CallLog,
    delays: HashMap<String, Duration>,
    fail_close: bool,
    closed: AtomicBool,
}

impl RecordingDriver {
    fn record(&self, sql: &str) -> Result<(), DriverError> {
        self.log.push(format!("{}: {}", self.name, sql));
        if let Some(delay) = self.delays.get(sql) {
            std::thread::sleep(*delay);
        }
        if sql.contains("FAIL") {
            return Err(disk_io_error());
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Driver for RecordingDriver {
    fn execute(&self, sql: &str, _params: &[Value]) -> Result<ExecMeta, DriverError> {
        self.record(sql)?;
        Ok(ExecMeta {
            changes: 1,
            last_insert_rowid: 0,
        })
    }

    fn execute_batch(&self, sql: &str) -> Result<(), DriverError> {
        self.record(sql)
    }

    fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.record(sql)?;
        Ok(Vec::new())
    }

    fn close(&self) -> Result<(), DriverError> {
        self.log.push(format!("{}: close", self.name));
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(sqlite_failure(ffi::SQLITE_BUSY, "unable to close due to unfinalized statements"));
        }
        Ok(())
    }
}

/// A latch the test opens to release held store opens.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn open(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }
}

/// Connector handing out [`RecordingDriver`]s that share one [`CallLog`].
#[derive(Clone, Default)]
pub struct RecordingConnector {
    pub log: CallLog,
    pub gate: Gate,
    held: HashSet<String>,
    failing_open: HashSet<String>,
    failing_close: HashSet<String>,
    delays: HashMap<String, Duration>,
    drivers: Arc<Mutex<HashMap<String, Arc<RecordingDriver>>>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block opening `store` until the gate opens.
    pub fn hold(mut self, store: &str) -> Self {
        self.held.insert(store.to_owned());
        self
    }

    pub fn fail_open(mut self, store: &str) -> Self {
        self.failing_open.insert(store.to_owned());
        self
    }

    pub fn fail_close(mut self, store: &str) -> Self {
        self.failing_close.insert(store.to_owned());
        self
    }

    /// Make calls with exactly this SQL sleep for `delay`.
    pub fn delay(mut self, sql: &str, delay: Duration) -> Self {
        self.delays.insert(sql.to_owned(), delay);
        self
    }

    pub fn driver(&self, store: &str) -> Option<Arc<RecordingDriver>> {
        self.drivers.lock().unwrap().get(store).cloned()
    }
}

impl Connector for RecordingConnector {
    fn open(&self, spec: &StoreSpec) -> Result<Arc<dyn Driver>, DriverError> {
        if self.held.contains(&spec.name) {
            self.gate.wait();
        }
        if self.failing_open.contains(&spec.name) {
            return Err(sqlite_failure(ffi::SQLITE_CANTOPEN, "unable to open database file"));
        }
        let driver = Arc::new(RecordingDriver {
            name: spec.name.clone(),
            log: self.log.clone(),
            delays: self.delays.clone(),
            fail_close: self.failing_close.contains(&spec.name),
            closed: AtomicBool::new(false),
        });
        self.drivers
            .lock()
            .unwrap()
            .insert(spec.name.clone(), Arc::clone(&driver));
        Ok(driver)
    }
}

/// Real SQLite driver that fails any SQL containing a marker with a chosen
/// error, and sleeps on SQL containing a delay marker.
pub struct FaultyDriver {
    inner: Arc<dyn Driver>,
    marker: String,
    error: fn() -> DriverError,
    delays: Vec<(String, Duration)>,
}

impl FaultyDriver {
    fn check(&self, sql: &str) -> Result<(), DriverError> {
        for (marker, delay) in &self.delays {
            if sql.contains(marker.as_str()) {
                std::thread::sleep(*delay);
            }
        }
        if sql.contains(&self.marker) {
            return Err((self.error)());
        }
        Ok(())
    }
}

impl Driver for FaultyDriver {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecMeta, DriverError> {
        self.check(sql)?;
        self.inner.execute(sql, params)
    }

    fn execute_batch(&self, sql: &str) -> Result<(), DriverError> {
        self.check(sql)?;
        self.inner.execute_batch(sql)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.check(sql)?;
        self.inner.query(sql, params)
    }

    fn query_writer(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.check(sql)?;
        self.inner.query_writer(sql, params)
    }

    fn close(&self) -> Result<(), DriverError> {
        self.inner.close()
    }
}

/// SQLite connector whose drivers raise `error` for SQL containing `marker`.
pub struct FaultInjectingConnector {
    inner: SqliteConnector,
    marker: String,
    error: fn() -> DriverError,
    delays: Vec<(String, Duration)>,
}

impl FaultInjectingConnector {
    pub fn new(marker: &str, error: fn() -> DriverError) -> Self {
        Self {
            inner: sqlite_connector(),
            marker: marker.to_owned(),
            error,
            delays: Vec::new(),
        }
    }

    /// Make SQL containing `marker` sleep for `delay` before running.
    pub fn delay(mut self, marker: &str, delay: Duration) -> Self {
        self.delays.push((marker.to_owned(), delay));
        self
    }
}

impl Connector for FaultInjectingConnector {
    fn open(&self, spec: &StoreSpec) -> Result<Arc<dyn Driver>, DriverError> {
        let inner = self.inner.open(spec)?;
        Ok(Arc::new(FaultyDriver {
            inner,
            marker: self.marker.clone(),
            error: self.error,
            delays: self.delays.clone(),
        }))
    }
}

/// Wait for a condition to become true with timeout.
///
/// Returns `true` if the condition was met, `false` if the timeout expired.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

pub fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}
