//! Read connection pool for a single store.
//!
//! Uses r2d2 with r2d2_sqlite for pooled read access.
//! SQLite WAL mode allows concurrent readers alongside the writer.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use std::path::Path;
use std::time::Duration;

use super::schema::apply_reader_pragmas;

/// Read-only connection pool for facade queries.
#[derive(Clone)]
pub struct ReaderPool {
    pool: Pool<SqliteConnectionManager>,
}

impl ReaderPool {
    /// Create a new reader pool for the given database path.
    ///
    /// The file must already exist; the writer connection creates it.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file
    /// * `max_size` - Maximum number of connections in the pool
    /// * `busy_timeout` - Busy timeout applied to each pooled connection
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        max_size: u32,
        busy_timeout: Duration,
    ) -> Result<Self, r2d2::Error> {
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);

        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .connection_customizer(Box::new(ReaderConnectionCustomizer { busy_timeout }))
            .build(manager)?;

        Ok(Self { pool })
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> Result<PooledConnection<SqliteConnectionManager>, r2d2::Error> {
        self.pool.get()
    }
}

/// Connection customizer that applies reader pragmas.
#[derive(Debug)]
struct ReaderConnectionCustomizer {
    busy_timeout: Duration,
}

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error>
    for ReaderConnectionCustomizer
{
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        apply_reader_pragmas(conn, self.busy_timeout)
    }
}
