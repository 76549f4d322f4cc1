//! Connection pragmas and the tables this crate owns.
//!
//! Application schemas belong to callers. The only DDL here is for the
//! failure log and the settings table.

use rusqlite::Connection;
use std::time::Duration;

/// Default busy timeout applied to every connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Failure log table, kept in the failure store.
pub const CREATE_ERROR_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS error_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    store_name TEXT NOT NULL,
    error_message TEXT NOT NULL,
    error_stack TEXT,
    occurrences INTEGER NOT NULL DEFAULT 1,
    last_occurred INTEGER NOT NULL,
    reported INTEGER NOT NULL DEFAULT 0
)
"#;

/// Index backing the dedup lookup.
pub const CREATE_ERROR_LOGS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_error_logs_message
    ON error_logs (store_name, error_message, last_occurred)
"#;

/// Two-column upsert table for persisted settings.
pub const CREATE_CONFIG: &str = r#"
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

/// Apply writer pragmas: WAL so readers never block the writer, and a busy
/// timeout so lock contention retries instead of failing with SQLITE_BUSY.
pub fn apply_pragmas(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(mode = %mode, "journal_mode WAL not accepted");
    }
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// Apply reader pragmas. Journal mode is a property of the file, so readers
/// only need the busy timeout.
pub fn apply_reader_pragmas(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)
}
