//! # Payable Repository
//!
//! Database operations for supplier payables derived from order
//! confirmations. Creation happens inside the confirming transition's
//! transaction; the payment lifecycle of a payable is out of scope here.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use tessera_core::Payable;

const PAYABLE_COLUMNS: &str =
    "id, payable_number, source_id, supplier_id, amount_cents, status, created_at";

/// Repository for payable database operations.
#[derive(Debug, Clone)]
pub struct PayableRepository {
    pool: SqlitePool,
}

impl PayableRepository {
    /// Creates a new PayableRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PayableRepository { pool }
    }

    /// Gets a payable by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Payable>> {
        let payable = sqlx::query_as::<_, Payable>(&format!(
            "SELECT {PAYABLE_COLUMNS} FROM payables WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payable)
    }

    /// Gets the payables derived from one order.
    pub async fn get_by_source(&self, source_id: &str) -> DbResult<Vec<Payable>> {
        let payables = sqlx::query_as::<_, Payable>(&format!(
            "SELECT {PAYABLE_COLUMNS} FROM payables WHERE source_id = ?1 ORDER BY created_at"
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payables)
    }

    /// Inserts a payable inside the caller's transaction.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - payable_number collided; the whole
    ///   transition rolls back and the caller retries
    pub async fn insert(&self, conn: &mut SqliteConnection, payable: &Payable) -> DbResult<()> {
        debug!(
            id = %payable.id,
            payable_number = %payable.payable_number,
            source_id = %payable.source_id,
            "inserting derived payable"
        );

        sqlx::query(
            r#"
            INSERT INTO payables (
                id, payable_number, source_id, supplier_id,
                amount_cents, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&payable.id)
        .bind(&payable.payable_number)
        .bind(&payable.source_id)
        .bind(&payable.supplier_id)
        .bind(payable.amount_cents)
        .bind(payable.status)
        .bind(payable.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }
}
