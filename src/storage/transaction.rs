//! Per-store transactions.
//!
//! A transaction holds the store's async mutex from BEGIN to COMMIT or
//! ROLLBACK, so two transactions on one store never interleave. Direct
//! `execute` calls do not take the mutex and can land between another
//! transaction's BEGIN and COMMIT; writers that need isolation must go
//! through [`Store::run_transaction`].

use std::sync::Arc;

use super::driver::Driver;
use super::store::Store;
use super::{StoreError, Value};
use crate::observability::metrics;

/// One statement of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A statement without parameters.
    pub fn plain(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

impl Store {
    /// Run statements in order inside one transaction.
    ///
    /// On the first failure the transaction is rolled back and the
    /// triggering `StoreError::Query` is returned unchanged. A failed
    /// rollback is logged and otherwise ignored.
    #[tracing::instrument(skip(self, statements), fields(store = %self.name(), statements = statements.len()))]
    pub async fn run_transaction(&self, statements: Vec<Statement>) -> Result<(), StoreError> {
        let Some(driver) = self.admit().await? else {
            return Err(self.shutdown_error());
        };
        let _token = self.tx_lock().lock().await;
        if self.is_cancelled() {
            return Err(self.shutdown_error());
        }

        let outcome = self.run_locked(&driver, statements).await;
        match &outcome {
            Ok(()) => metrics::record_transaction(self.name(), "committed"),
            Err(e) => {
                tracing::error!(error = %e, "Transaction rolled back");
                metrics::record_transaction(self.name(), "rolled_back");
            }
        }
        outcome
    }

    async fn run_locked(
        &self,
        driver: &Arc<dyn Driver>,
        statements: Vec<Statement>,
    ) -> Result<(), StoreError> {
        self.call(Arc::clone(driver), "exec", true, |d| {
            d.execute_batch("BEGIN TRANSACTION")
        })
        .await?;

        let mut result = Ok(());
        for Statement { sql, params } in statements {
            result = self
                .call(Arc::clone(driver), "execute", true, move |d| {
                    d.execute(&sql, &params).map(|_| ())
                })
                .await;
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            result = self
                .call(Arc::clone(driver), "exec", true, |d| d.execute_batch("COMMIT"))
                .await;
        }

        if result.is_err() {
            self.rollback(driver).await;
        }
        result
    }

    async fn rollback(&self, driver: &Arc<dyn Driver>) {
        let driver = Arc::clone(driver);
        match tokio::task::spawn_blocking(move || driver.execute_batch("ROLLBACK")).await {
            Ok(Ok(())) => tracing::debug!(store = %self.name(), "Rollback complete"),
            Ok(Err(e)) => tracing::error!(store = %self.name(), error = %e, "Rollback failed"),
            Err(e) => tracing::error!(store = %self.name(), error = %e, "Rollback task failed"),
        }
    }
}
