//! # Transactional Unit of Work
//!
//! The boundary that groups a lifecycle transition, ledger mutations and
//! derived-record creation into one atomic commit/rollback.
//!
//! ## Isolation Level In Effect
//! SQLite serializes writers; WAL mode gives each transaction a stable
//! snapshot for reads. Together with the ledger's conditional updates this
//! is the "read-committed with conditional update" option: the WHERE clause
//! re-asserts every precondition at write time, so a stricter serializable
//! mode is not required for correctness. When SQLite refuses a snapshot
//! lock upgrade ("database is locked"), the error maps to a retryable
//! Conflict (see crate::error).
//!
//! ## Deadline Semantics
//! Each unit of work carries a deadline. Exceeding it cancels the body,
//! which drops the transaction - sqlx rolls an unfinished transaction back
//! when it is dropped - and reports a retryable Timeout. A timeout is never
//! a silent partial commit.

use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, Result};

/// One atomic transaction boundary.
///
/// ## Usage
/// ```rust,ignore
/// let uow = db.unit_of_work();
/// let outcome = uow
///     .run(move |conn| {
///         Box::pin(async move {
///             ledger.reserve(conn, &sku, 10, &order_id).await?;
///             orders.update_status(conn, &order_id, from, to, None).await?;
///             Ok(summary)
///         })
///     })
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    pool: SqlitePool,
    timeout: Duration,
}

impl UnitOfWork {
    /// Creates a unit of work bound to a pool and deadline.
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        UnitOfWork { pool, timeout }
    }

    /// Executes `op` with a transaction handle: commits on normal return,
    /// rolls back on any error, panic unwind or deadline expiry.
    ///
    /// The closure receives the bare connection of the transaction; every
    /// statement it runs lands in the same commit.
    ///
    /// ## Returns
    /// * `Err(DbError::Timeout)` - deadline elapsed; transaction rolled
    ///   back; safe to retry
    pub async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let body = async {
            let mut tx = self.pool.begin().await.map_err(DbError::from)?;

            let value = op(&mut *tx).await?;

            tx.commit().await.map_err(DbError::from)?;
            debug!("unit of work committed");
            Ok(value)
        };

        match tokio::time::timeout(self.timeout, body).await {
            Ok(result) => result,
            Err(_elapsed) => {
                // The body future was dropped mid-flight; sqlx rolled the
                // open transaction back on drop.
                warn!(timeout = ?self.timeout, "unit of work exceeded its deadline");
                Err(DbError::Timeout(self.timeout).into())
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
