//! Low-level store drivers.
//!
//! A [`Driver`] is the blocking connection underneath one store. The facade
//! never calls it directly from async code; every call is moved onto the
//! blocking pool. [`SqliteDriver`] keeps one writer connection and a
//! read-only [`ReaderPool`].

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

use super::manager::StoreSpec;
use super::reader::ReaderPool;
use super::schema::{apply_pragmas, DEFAULT_BUSY_TIMEOUT};

/// Error type for driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("reader pool unavailable: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("connection is closed")]
    Closed,
}

/// Result of a write-style statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecMeta {
    /// Rows changed by the statement
    pub changes: usize,
    /// Rowid of the most recent successful INSERT on the writer connection
    pub last_insert_rowid: i64,
}

/// One result row: column names shared across the result set, owned values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row from column names and values of equal length.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Look up a value by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Text value of a column, if present and TEXT.
    pub fn get_text(&self, column: &str) -> Option<&str> {
        match self.get(column)? {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value of a column, if present and INTEGER.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Render the row as a JSON object. BLOBs become arrays of bytes.
    pub fn to_json(&self) -> JsonValue {
        let map: JsonMap<String, JsonValue> = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(column, value)| {
                let json = match value {
                    Value::Null => JsonValue::Null,
                    Value::Integer(i) => JsonValue::from(*i),
                    Value::Real(f) => JsonValue::from(*f),
                    Value::Text(s) => JsonValue::from(s.as_str()),
                    Value::Blob(b) => JsonValue::from(b.clone()),
                };
                (column.clone(), json)
            })
            .collect();
        JsonValue::Object(map)
    }
}

/// Blocking connection underneath one store.
///
/// Entry points mirror the three call styles the facade needs: `execute`
/// for writes, `execute_batch` for parameterless control statements
/// (BEGIN/COMMIT/ROLLBACK, DDL) and `query` for reads.
pub trait Driver: Send + Sync + 'static {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecMeta, DriverError>;

    fn execute_batch(&self, sql: &str) -> Result<(), DriverError>;

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError>;

    /// Query on the connection that carries writes, so the result reflects
    /// that connection's own uncommitted changes.
    fn query_writer(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.query(sql, params)
    }

    /// Release the underlying OS handle.
    fn close(&self) -> Result<(), DriverError>;
}

/// Opens a [`Driver`] for a store spec.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, spec: &StoreSpec) -> Result<Arc<dyn Driver>, DriverError>;
}

/// SQLite driver: one writer connection and a read-only reader pool.
pub struct SqliteDriver {
    writer: Mutex<Option<Connection>>,
    readers: Mutex<Option<ReaderPool>>,
}

impl SqliteDriver {
    /// Open the writer (creating the file if needed), apply WAL and busy
    /// timeout, then build the reader pool on top of the same file.
    pub fn open<P: AsRef<Path>>(
        path: P,
        busy_timeout: Duration,
        reader_pool_size: u32,
    ) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let writer = Connection::open(path)?;
        apply_pragmas(&writer, busy_timeout)?;
        let readers = ReaderPool::new(path, reader_pool_size, busy_timeout)?;
        Ok(Self {
            writer: Mutex::new(Some(writer)),
            readers: Mutex::new(Some(readers)),
        })
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_ref().ok_or(DriverError::Closed)?;
        f(conn)
    }

    fn reader_pool(&self) -> Result<ReaderPool, DriverError> {
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DriverError::Closed)
    }
}

impl Driver for SqliteDriver {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecMeta, DriverError> {
        self.with_writer(|conn| {
            let changes = conn.execute(sql, params_from_iter(params.iter()))?;
            Ok(ExecMeta {
                changes,
                last_insert_rowid: conn.last_insert_rowid(),
            })
        })
    }

    fn execute_batch(&self, sql: &str) -> Result<(), DriverError> {
        self.with_writer(|conn| Ok(conn.execute_batch(sql)?))
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        let pool = self.reader_pool()?;
        let conn = pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        if !stmt.readonly() {
            // INSERT ... RETURNING and write pragmas need the writer
            drop(stmt);
            drop(conn);
            return self.query_writer(sql, params);
        }
        collect_rows(&mut stmt, params)
    }

    fn query_writer(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.with_writer(|conn| {
            let mut stmt = conn.prepare(sql)?;
            collect_rows(&mut stmt, params)
        })
    }

    fn close(&self) -> Result<(), DriverError> {
        // Dropping the pool closes every idle reader.
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let conn = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(DriverError::Closed)?;
        conn.close().map_err(|(_, e)| DriverError::Sqlite(e))
    }
}

fn collect_rows(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> Result<Vec<Row>, DriverError> {
    let columns: Arc<[String]> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>()
        .into();
    let width = columns.len();
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            (0..width)
                .map(|idx| row.get::<_, Value>(idx))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows
        .into_iter()
        .map(|values| Row::new(Arc::clone(&columns), values))
        .collect())
}

/// Connector producing [`SqliteDriver`]s.
#[derive(Debug, Clone, Copy)]
pub struct SqliteConnector {
    pub busy_timeout: Duration,
    pub reader_pool_size: u32,
}

impl SqliteConnector {
    pub fn new(busy_timeout: Duration, reader_pool_size: u32) -> Self {
        Self {
            busy_timeout,
            reader_pool_size,
        }
    }
}

impl Default for SqliteConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BUSY_TIMEOUT, 4)
    }
}

impl Connector for SqliteConnector {
    fn open(&self, spec: &StoreSpec) -> Result<Arc<dyn Driver>, DriverError> {
        let driver = SqliteDriver::open(&spec.path, self.busy_timeout, self.reader_pool_size)?;
        Ok(Arc::new(driver))
    }
}
