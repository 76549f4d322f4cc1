//! Windowed failure log.
//!
//! Identical messages from the same store collapse into one counted entry
//! while each sighting lands within the window of the entry's last
//! occurrence. A sighting after the window starts a new entry; old entries
//! are never touched again or deleted.
//!
//! Every write here holds the log store's transaction lock, so log entries
//! never join (and never get rolled back with) a caller's open transaction.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;

use super::notify::{FailureBus, FailureNotice};
use super::FailureReport;
use crate::lifecycle::ShutdownState;
use crate::observability::metrics;
use crate::storage::schema::{CREATE_ERROR_LOGS, CREATE_ERROR_LOGS_INDEX};
use crate::storage::{Row, Store, StoreError, Value};

/// Default dedup window.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(1800);

const FIND_RECENT: &str = r#"
SELECT id, occurrences FROM error_logs
WHERE store_name = ?1 AND error_message = ?2 AND last_occurred > ?3
ORDER BY last_occurred DESC, id DESC
LIMIT 1
"#;

const SELECT_ENTRIES: &str = r#"
SELECT id, store_name, error_message, error_stack, occurrences, last_occurred, reported
FROM error_logs
"#;

/// One persisted failure record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: i64,
    pub store: String,
    pub message: String,
    pub stack: Option<String>,
    pub occurrences: i64,
    /// Unix seconds
    pub last_occurred: i64,
    pub reported: bool,
}

impl ErrorLogEntry {
    fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            id: row.get_i64("id")?,
            store: row.get_text("store_name")?.to_owned(),
            message: row.get_text("error_message")?.to_owned(),
            stack: row.get_text("error_stack").map(str::to_owned),
            occurrences: row.get_i64("occurrences")?,
            last_occurred: row.get_i64("last_occurred")?,
            reported: row.get_i64("reported")? != 0,
        })
    }
}

/// Failure log kept in one store (the guild store by default).
pub struct FailureLog {
    store: Store,
    shutdown: ShutdownState,
    bus: FailureBus,
    window: Duration,
    // notices go out in the order entries were persisted
    serial: Mutex<()>,
}

impl FailureLog {
    pub fn new(store: Store, shutdown: ShutdownState, bus: FailureBus, window: Duration) -> Self {
        Self {
            store,
            shutdown,
            bus,
            window,
            serial: Mutex::new(()),
        }
    }

    /// Store holding the `error_logs` table.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn bus(&self) -> &FailureBus {
        &self.bus
    }

    /// Record a failure at the current time.
    pub async fn record(&self, report: &FailureReport) {
        self.record_at(report, crate::now_secs()).await;
    }

    /// Record a failure observed at `now` (unix seconds).
    ///
    /// Never fails: persistence errors are logged and the notice is still
    /// emitted. Does nothing once shutdown has begun.
    pub async fn record_at(&self, report: &FailureReport, now: i64) {
        if self.shutdown.is_shutting_down() {
            tracing::warn!(
                store = %report.store,
                error = %report.message,
                "Shutdown in progress, skipping failure log"
            );
            return;
        }
        tracing::error!(store = %report.store, error = %report.message, "Store failure");

        let _serial = self.serial.lock().await;
        let occurrences = match self.persist(report, now).await {
            Ok(count) => {
                metrics::record_failure_logged(&report.store);
                Some(count)
            }
            Err(e) => {
                tracing::error!(
                    store = %report.store,
                    log_store = %self.store.name(),
                    error = %e,
                    "Failed to persist failure log entry"
                );
                None
            }
        };

        self.bus.notify(FailureNotice {
            store: report.store.clone(),
            message: report.message.clone(),
            stack: report.stack.clone(),
            occurrences,
        });
    }

    /// Upsert the entry and return its occurrence count.
    ///
    /// Uses the quiet store paths so a failing log store cannot feed
    /// its own failures back into the recorder. The lookup runs on the
    /// writer so find-then-update sees exactly what it updates.
    async fn persist(&self, report: &FailureReport, now: i64) -> Result<i64, StoreError> {
        let _tx = self.store.tx_lock().lock().await;
        self.ensure_table().await?;

        let cutoff = now - self.window.as_secs() as i64;
        let existing = self
            .store
            .query_one_writer_quiet(
                FIND_RECENT,
                &[
                    Value::Text(report.store.clone()),
                    Value::Text(report.message.clone()),
                    Value::Integer(cutoff),
                ],
            )
            .await?;

        match existing.and_then(|row| Some((row.get_i64("id")?, row.get_i64("occurrences")?))) {
            Some((id, occurrences)) => {
                self.store
                    .execute_quiet(
                        "UPDATE error_logs SET occurrences = occurrences + 1, last_occurred = ?1 WHERE id = ?2",
                        &[Value::Integer(now), Value::Integer(id)],
                    )
                    .await?;
                Ok(occurrences + 1)
            }
            None => {
                self.store
                    .execute_quiet(
                        "INSERT INTO error_logs (store_name, error_message, error_stack, occurrences, last_occurred) VALUES (?1, ?2, ?3, 1, ?4)",
                        &[
                            Value::Text(report.store.clone()),
                            Value::Text(report.message.clone()),
                            report.stack.clone().map_or(Value::Null, Value::Text),
                            Value::Integer(now),
                        ],
                    )
                    .await?;
                Ok(1)
            }
        }
    }

    /// Create the table if missing. Not cached, so a dropped table is
    /// recreated. Caller holds `tx_lock`.
    async fn ensure_table(&self) -> Result<(), StoreError> {
        self.store.execute_batch_quiet(CREATE_ERROR_LOGS).await?;
        self.store.execute_batch_quiet(CREATE_ERROR_LOGS_INDEX).await
    }

    /// All entries, oldest first.
    pub async fn entries(&self) -> Result<Vec<ErrorLogEntry>, StoreError> {
        self.load(&format!("{SELECT_ENTRIES} ORDER BY id ASC")).await
    }

    /// Entries not yet marked as reported by the escalation side.
    pub async fn unreported(&self) -> Result<Vec<ErrorLogEntry>, StoreError> {
        self.load(&format!("{SELECT_ENTRIES} WHERE reported = 0 ORDER BY id ASC"))
            .await
    }

    /// Mark an entry as reported. Returns false if no such entry.
    pub async fn mark_reported(&self, id: i64) -> Result<bool, StoreError> {
        let _tx = self.store.tx_lock().lock().await;
        self.ensure_table().await?;
        let meta = self
            .store
            .execute_quiet(
                "UPDATE error_logs SET reported = 1 WHERE id = ?1",
                &[Value::Integer(id)],
            )
            .await?;
        Ok(meta.changes > 0)
    }

    async fn load(&self, sql: &str) -> Result<Vec<ErrorLogEntry>, StoreError> {
        let created = {
            let _tx = self.store.tx_lock().lock().await;
            self.ensure_table().await
        };
        match created {
            // reads degrade to empty after cancellation
            Err(e) if e.is_shutdown() => return Ok(Vec::new()),
            other => other?,
        }
        let rows = self.store.query_many_quiet(sql, &[]).await?;
        Ok(rows.iter().filter_map(ErrorLogEntry::from_row).collect())
    }
}
