//! Persisted key-value settings.
//!
//! A thin layer over the query facade: values are stored as text in a
//! two-column upsert table and carry no history.

use crate::storage::schema::CREATE_CONFIG;
use crate::storage::{Store, StoreError, Value};

/// Settings table in one store (the main store in the binary).
#[derive(Debug, Clone)]
pub struct Settings {
    store: Store,
}

impl Settings {
    /// Bind to `store`, creating the table if needed.
    pub async fn open(store: Store) -> Result<Self, StoreError> {
        store.execute_batch(CREATE_CONFIG).await?;
        Ok(Self { store })
    }

    /// Value for `key`, or `default` when unset.
    pub async fn get(&self, key: &str, default: &str) -> Result<String, StoreError> {
        let row = self
            .store
            .query_one(
                "SELECT value FROM config WHERE key = ?1",
                &[Value::Text(key.to_owned())],
            )
            .await?;
        Ok(row
            .and_then(|r| r.get_text("value").map(str::to_owned))
            .unwrap_or_else(|| default.to_owned()))
    }

    /// Insert or replace `key`.
    pub async fn set(&self, key: &str, value: impl ToString) -> Result<(), StoreError> {
        self.store
            .execute(
                "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
                &[Value::Text(key.to_owned()), Value::Text(value.to_string())],
            )
            .await?;
        Ok(())
    }
}
