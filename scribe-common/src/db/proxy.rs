//! Connection proxy over the SQLite pool
//!
//! Two access modes:
//! - **autocommit**: statements run directly on the pool, each one committing
//!   on its own. Used for reads and single-row conditional updates.
//! - **scoped transaction**: [`DbProxy::transaction`] checks out one connection,
//!   runs the callback inside `BEGIN`, commits when it returns `Ok`, rolls back
//!   when it returns `Err`, and always hands the connection back to the pool.
//!   A panic inside the callback drops the transaction, which sqlx rolls back
//!   before the connection is reused.
//! - **write transaction**: [`DbProxy::write_transaction`] is the same scope
//!   opened with `BEGIN IMMEDIATE`, so the write lock is held from the first
//!   statement and read-then-write bodies never fail upgrading a shared lock.
//!
//! A transaction opened from inside another one on the same task fails with
//! [`Error::NestedTransaction`] before touching the pool.

use futures::future::BoxFuture;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::{Error, Result};

tokio::task_local! {
    /// Caller name of the transaction active on the current task
    static ACTIVE_TRANSACTION: &'static str;
}

/// Transactions held longer than this are logged at INFO
const SLOW_TRANSACTION_MS: u128 = 1000;

/// Pooled database access shared by every handler
#[derive(Clone, Debug)]
pub struct DbProxy {
    pool: SqlitePool,
}

impl DbProxy {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Executor for single-statement autocommit access
    pub fn autocommit(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether the current task is inside a scoped transaction
    pub fn in_transaction() -> bool {
        ACTIVE_TRANSACTION.try_with(|_| ()).is_ok()
    }

    /// Run `body` inside one transaction on a dedicated connection
    ///
    /// # Example
    /// ```ignore
    /// let moved = proxy
    ///     .transaction("claim_batch", move |conn| Box::pin(async move {
    ///         sqlx::query("UPDATE ...").execute(&mut *conn).await?;
    ///         Ok(ids)
    ///     }))
    ///     .await?;
    /// ```
    pub async fn transaction<T, F>(&self, caller: &'static str, body: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        self.scoped(caller, None, body).await
    }

    /// Like [`DbProxy::transaction`], holding the database write lock from `BEGIN`
    pub async fn write_transaction<T, F>(&self, caller: &'static str, body: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        self.scoped(caller, Some("BEGIN IMMEDIATE"), body).await
    }

    async fn scoped<T, F>(
        &self,
        caller: &'static str,
        begin: Option<&'static str>,
        body: F,
    ) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        if let Ok(outer) = ACTIVE_TRANSACTION.try_with(|name| *name) {
            warn!(outer, inner = caller, "Rejected nested transaction");
            return Err(Error::NestedTransaction {
                outer,
                inner: caller,
            });
        }

        let requested_at = Instant::now();
        debug!(caller, "Connection acquisition requested");

        let mut tx = match begin {
            Some(statement) => self.pool.begin_with(statement).await?,
            None => self.pool.begin().await?,
        };

        debug!(
            caller,
            wait_ms = requested_at.elapsed().as_millis() as u64,
            "Connection acquired"
        );
        let acquired_at = Instant::now();

        let outcome = ACTIVE_TRANSACTION.scope(caller, body(&mut *tx)).await;
        let held_ms = acquired_at.elapsed().as_millis();

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                if held_ms > SLOW_TRANSACTION_MS {
                    info!(caller, held_ms = held_ms as u64, "Transaction held longer than expected");
                } else {
                    debug!(caller, held_ms = held_ms as u64, "Connection released (commit)");
                }
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    // The connection is closed instead of being reused when rollback fails
                    warn!(caller, error = %rollback_err, "Rollback failed");
                }
                debug!(caller, held_ms = held_ms as u64, error = %err, "Connection released (rollback)");
                Err(err)
            }
        }
    }
}
