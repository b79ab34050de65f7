//! # Idempotency Guard
//!
//! Wraps a state-changing operation with a caller-supplied key so repeated
//! invocations return the first result without re-executing side effects.
//!
//! ## The Same-Transaction Guarantee
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Why the record rides the same commit                    │
//! │                                                                         │
//! │  Client request (key K)                                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. SELECT record WHERE (key, op, resource) = (K, ...)         │   │
//! │  │     found? → return stored result, run NOTHING                 │   │
//! │  │                                                                 │   │
//! │  │  2. run the wrapped operation (its writes land here too)       │   │
//! │  │                                                                 │   │
//! │  │  3. INSERT idempotency_records (K, ..., result JSON)           │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← operation applied and record saved atomically;               │
//! │           a crash between the two cannot happen                        │
//! │                                                                         │
//! │  Operation failed? Nothing persists; the caller may retry freely.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Reuse Policy
//! The input fingerprint is stored beside the key. A reused key whose
//! fingerprint differs is a caller bug and fails loudly with
//! `KeyReuseMismatch` instead of being served a stale result.

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult, Result};
use tessera_core::IdempotencyRecord;

const RECORD_COLUMNS: &str =
    "idem_key, operation_type, resource_id, input_fingerprint, result, created_at, expires_at";

/// Identity of one guarded operation.
#[derive(Debug, Clone, Copy)]
pub struct IdempotencyScope<'a> {
    /// Caller-supplied token scoping "same logical request" across retries.
    pub key: &'a str,
    /// E.g. "order_status_change", "order_create".
    pub operation_type: &'a str,
    /// The entity the operation targets.
    pub resource_id: &'a str,
}

/// The idempotency guard.
///
/// Records are write-once: inserted with the guarded operation's own commit,
/// never updated in place, ignored (and lazily reaped) after expiry.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard {
    pool: SqlitePool,

    /// Optional record lifetime. `None` keeps records until purged.
    ttl: Option<ChronoDuration>,
}

impl IdempotencyGuard {
    /// Creates a guard with no record expiry.
    pub fn new(pool: SqlitePool) -> Self {
        IdempotencyGuard { pool, ttl: None }
    }

    /// Sets a record time-to-live. Expired records no longer short-circuit
    /// the operation and are deleted when encountered.
    pub fn with_ttl(mut self, ttl: ChronoDuration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Computes the input fingerprint for a request payload.
    pub fn fingerprint<T: Serialize>(input: &T) -> DbResult<String> {
        let json = serde_json::to_vec(input)?;
        let digest = Sha256::digest(&json);
        Ok(hex::encode(digest))
    }

    /// Looks up a record on the pool (diagnostics; the guard itself reads
    /// inside the guarded transaction).
    pub async fn find(&self, scope: IdempotencyScope<'_>) -> DbResult<Option<IdempotencyRecord>> {
        fetch(&self.pool, scope).await
    }

    /// Deletes expired records. Returns the number removed.
    pub async fn purge_expired(&self) -> DbResult<u64> {
        let now = Utc::now();
        let result =
            sqlx::query("DELETE FROM idempotency_records WHERE expires_at IS NOT NULL AND expires_at <= ?1")
                .bind(now)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// Executes `op` at most once for the given scope.
    ///
    /// ## Behavior
    /// - Record exists (and is unexpired): return its stored result without
    ///   invoking `op` - the at-most-once guarantee for side effects.
    /// - Record exists with a different fingerprint: `KeyReuseMismatch`.
    /// - No record: run `op` on the same connection, then persist the record
    ///   so it commits atomically with the operation's own writes.
    /// - `op` fails: nothing is persisted; the caller may retry freely.
    ///
    /// `conn` must be a transaction the caller will commit; running this on a
    /// bare connection would forfeit the same-commit guarantee.
    pub async fn with_idempotency<T>(
        &self,
        conn: &mut SqliteConnection,
        scope: IdempotencyScope<'_>,
        fingerprint: &str,
        op: impl for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        if let Some(record) = fetch(&mut *conn, scope).await? {
            let expired = record
                .expires_at
                .map(|exp| exp <= Utc::now())
                .unwrap_or(false);

            if !expired {
                if record.input_fingerprint != fingerprint {
                    return Err(DbError::KeyReuseMismatch {
                        key: scope.key.to_string(),
                        operation_type: scope.operation_type.to_string(),
                    }
                    .into());
                }

                debug!(
                    key = scope.key,
                    operation_type = scope.operation_type,
                    resource_id = scope.resource_id,
                    "idempotent replay, returning stored result"
                );
                let value: T = serde_json::from_str(&record.result).map_err(DbError::from)?;
                return Ok(value);
            }

            // Expired: clear the slot so the fresh record can take the PK.
            delete(&mut *conn, scope).await?;
        }

        let value = op(conn).await?;

        let now = Utc::now();
        let record = IdempotencyRecord {
            idem_key: scope.key.to_string(),
            operation_type: scope.operation_type.to_string(),
            resource_id: scope.resource_id.to_string(),
            input_fingerprint: fingerprint.to_string(),
            result: serde_json::to_string(&value).map_err(DbError::from)?,
            created_at: now,
            expires_at: self.ttl.map(|ttl| now + ttl),
        };
        insert(conn, &record).await?;

        Ok(value)
    }
}

// =============================================================================
// Internal Helpers
// =============================================================================

async fn fetch<'e, E>(executor: E, scope: IdempotencyScope<'_>) -> DbResult<Option<IdempotencyRecord>>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let record = sqlx::query_as::<_, IdempotencyRecord>(&format!(
        "SELECT {RECORD_COLUMNS} FROM idempotency_records \
         WHERE idem_key = ?1 AND operation_type = ?2 AND resource_id = ?3"
    ))
    .bind(scope.key)
    .bind(scope.operation_type)
    .bind(scope.resource_id)
    .fetch_optional(executor)
    .await?;

    Ok(record)
}

async fn insert(conn: &mut SqliteConnection, record: &IdempotencyRecord) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO idempotency_records (
            idem_key, operation_type, resource_id,
            input_fingerprint, result, created_at, expires_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&record.idem_key)
    .bind(&record.operation_type)
    .bind(&record.resource_id)
    .bind(&record.input_fingerprint)
    .bind(&record.result)
    .bind(record.created_at)
    .bind(record.expires_at)
    .execute(conn)
    .await?;

    Ok(())
}

async fn delete(conn: &mut SqliteConnection, scope: IdempotencyScope<'_>) -> DbResult<()> {
    sqlx::query(
        "DELETE FROM idempotency_records \
         WHERE idem_key = ?1 AND operation_type = ?2 AND resource_id = ?3",
    )
    .bind(scope.key)
    .bind(scope.operation_type)
    .bind(scope.resource_id)
    .execute(conn)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const SCOPE: IdempotencyScope<'static> = IdempotencyScope {
        key: "key-1",
        operation_type: "order_status_change",
        resource_id: "order-1",
    };

    async fn guarded_call(
        db: &Database,
        guard: &IdempotencyGuard,
        fingerprint: &str,
        calls: Arc<AtomicU32>,
    ) -> Result<u32> {
        let guard = guard.clone();
        let fingerprint = fingerprint.to_string();
        db.unit_of_work()
            .run(move |conn| {
                Box::pin(async move {
                    guard
                        .with_idempotency(conn, SCOPE, &fingerprint, move |_conn| {
                            Box::pin(async move {
                                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                                Ok(n)
                            })
                        })
                        .await
                })
            })
            .await
    }

    #[tokio::test]
    async fn test_executes_exactly_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let guard = db.idempotency();
        let calls = Arc::new(AtomicU32::new(0));

        let first = guarded_call(&db, &guard, "fp-1", calls.clone()).await.unwrap();
        let second = guarded_call(&db, &guard, "fp-1", calls.clone()).await.unwrap();

        // Same result both times, side effect ran once
        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_key_reuse_with_different_input_fails_loudly() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let guard = db.idempotency();
        let calls = Arc::new(AtomicU32::new(0));

        guarded_call(&db, &guard, "fp-1", calls.clone()).await.unwrap();
        let err = guarded_call(&db, &guard, "fp-2", calls.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Db(DbError::KeyReuseMismatch { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_operation_persists_nothing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let guard = db.idempotency();

        let result: Result<u32> = db
            .unit_of_work()
            .run({
                let guard = guard.clone();
                move |conn| {
                    Box::pin(async move {
                        guard
                            .with_idempotency(conn, SCOPE, "fp-1", |_conn| {
                                Box::pin(async move {
                                    Err(Error::Db(DbError::conflict("simulated failure")))
                                })
                            })
                            .await
                    })
                }
            })
            .await;
        assert!(result.is_err());

        // No record was stored, so a retry executes the operation
        assert!(guard.find(SCOPE).await.unwrap().is_none());

        let calls = Arc::new(AtomicU32::new(0));
        let value = guarded_call(&db, &guard, "fp-1", calls.clone()).await.unwrap();
        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_record_runs_again() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        // Already-expired TTL: every stored record is immediately stale
        let guard = db.idempotency().with_ttl(ChronoDuration::seconds(-60));
        let calls = Arc::new(AtomicU32::new(0));

        let first = guarded_call(&db, &guard, "fp-1", calls.clone()).await.unwrap();
        let second = guarded_call(&db, &guard, "fp-1", calls.clone()).await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let guard = db.idempotency().with_ttl(ChronoDuration::seconds(-60));
        let calls = Arc::new(AtomicU32::new(0));

        guarded_call(&db, &guard, "fp-1", calls.clone()).await.unwrap();
        let purged = guard.purge_expired().await.unwrap();
        assert_eq!(purged, 1);
    }

    #[test]
    fn test_fingerprint_is_stable_and_input_sensitive() {
        let a = IdempotencyGuard::fingerprint(&("order-1", 3)).unwrap();
        let b = IdempotencyGuard::fingerprint(&("order-1", 3)).unwrap();
        let c = IdempotencyGuard::fingerprint(&("order-1", 4)).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64); // hex-encoded SHA-256
    }
}
