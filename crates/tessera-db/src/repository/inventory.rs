//! # Inventory Ledger
//!
//! The single gate for StockRecord mutations. No other component writes
//! stock rows; every mutation is a conditional UPDATE that re-asserts its
//! precondition against current persisted state.
//!
//! ## The Conditional-Update Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   Reserve Under Concurrency                             │
//! │                                                                         │
//! │  Handler A: reserve(sku, 60)          Handler B: reserve(sku, 60)      │
//! │       │                                    │                            │
//! │       ▼                                    ▼                            │
//! │  SELECT quantity=100, reserved=0      SELECT quantity=100, reserved=0  │
//! │  available 100 ≥ 60 ✓                 available 100 ≥ 60 ✓             │
//! │       │                                    │                            │
//! │       ▼                                    ▼                            │
//! │  UPDATE ... SET reserved += 60        UPDATE ... SET reserved += 60    │
//! │  WHERE quantity - reserved >= 60      WHERE quantity - reserved >= 60  │
//! │       │                                    │                            │
//! │       ▼                                    ▼                            │
//! │  1 row affected → COMMIT              0 rows affected (or the store    │
//! │                                       refuses the lock upgrade)        │
//! │                                            │                            │
//! │                                            ▼                            │
//! │                                       re-read: available 40 < 60       │
//! │                                       → InsufficientStock              │
//! │                                                                         │
//! │  The WHERE clause is the lock. No mutex, no in-process state -         │
//! │  correct across independent service instances.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Numeric Semantics
//! Quantities are non-negative i64. Operations that would drive `quantity`
//! or `available` negative fail closed rather than clamping; only `release`
//! floors at zero (releasing more than is held is not an error).

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult, Error, Result};
use tessera_core::validation::validate_quantity;
use tessera_core::{CoreError, MovementKind, SkuKey, StockMovement, StockRecord};

/// How many times a mutator re-reads and re-attempts its single conditional
/// update before reporting Conflict. This is the narrow, provably-safe
/// internal retry; whole-operation retries stay caller-driven.
const CONDITIONAL_UPDATE_RETRIES: u32 = 3;

const STOCK_COLUMNS: &str = "id, product_id, variant_id, batch_number, \
     quantity, reserved_quantity, version, created_at, updated_at";

/// The inventory ledger.
///
/// Read helpers run on the pool. Mutating operations take a caller-supplied
/// transaction connection so they compose into one unit of work with the
/// order-status flip and derived-record writes.
#[derive(Debug, Clone)]
pub struct InventoryLedger {
    pool: SqlitePool,
}

impl InventoryLedger {
    /// Creates a new InventoryLedger.
    pub fn new(pool: SqlitePool) -> Self {
        InventoryLedger { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets the stock record for a SKU key.
    pub async fn get(&self, sku: &SkuKey) -> DbResult<Option<StockRecord>> {
        fetch_by_sku(&self.pool, sku).await
    }

    /// Builds a fresh stock record for a SKU (not yet persisted).
    pub fn build_record(sku: &SkuKey, quantity: i64) -> StockRecord {
        let now = Utc::now();
        StockRecord {
            id: Uuid::new_v4().to_string(),
            product_id: sku.product_id.clone(),
            variant_id: sku.variant_column().to_string(),
            batch_number: sku.batch_column().to_string(),
            quantity,
            reserved_quantity: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reads the movement journal for a stock line, oldest first.
    pub async fn movements(&self, stock_id: &str) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            "SELECT id, stock_id, kind, delta, reason_code, order_id, created_at \
             FROM stock_movements WHERE stock_id = ?1 ORDER BY created_at",
        )
        .bind(stock_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Registers a new stock line.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - the SKU key already exists
    pub async fn insert(&self, record: &StockRecord) -> DbResult<()> {
        debug!(product_id = %record.product_id, quantity = record.quantity, "registering stock line");

        sqlx::query(
            r#"
            INSERT INTO stock_records (
                id, product_id, variant_id, batch_number,
                quantity, reserved_quantity, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&record.id)
        .bind(&record.product_id)
        .bind(&record.variant_id)
        .bind(&record.batch_number)
        .bind(record.quantity)
        .bind(record.reserved_quantity)
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Mutations (caller-supplied transaction)
    // =========================================================================

    /// Places a soft hold on stock: `reserved_quantity += quantity`.
    ///
    /// ## Returns
    /// * `Ok(())` - reservation placed
    /// * `Err(CoreError::InsufficientStock)` - available < quantity
    /// * `Err(DbError::NotFound)` - no stock line for the SKU key
    /// * `Err(DbError::Conflict)` - concurrent writers kept invalidating the
    ///   precondition; retry the whole operation with fresh state
    pub async fn reserve(
        &self,
        conn: &mut SqliteConnection,
        sku: &SkuKey,
        quantity: i64,
        order_id: &str,
    ) -> Result<()> {
        validate_quantity(quantity).map_err(CoreError::Validation)?;

        for _attempt in 0..CONDITIONAL_UPDATE_RETRIES {
            let record = fetch_required(&mut *conn, sku).await?;

            if record.available() < quantity {
                return Err(CoreError::InsufficientStock {
                    sku: sku.display(),
                    available: record.available(),
                    requested: quantity,
                }
                .into());
            }

            // The WHERE clause re-asserts the precondition at write time.
            let result = sqlx::query(
                r#"
                UPDATE stock_records SET
                    reserved_quantity = reserved_quantity + ?1,
                    version = version + 1,
                    updated_at = ?2
                WHERE id = ?3
                  AND quantity - reserved_quantity >= ?1
                "#,
            )
            .bind(quantity)
            .bind(Utc::now())
            .bind(&record.id)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 1 {
                journal(conn, &record.id, MovementKind::Reserve, quantity, None, Some(order_id))
                    .await?;
                debug!(sku = %sku.display(), quantity, order_id, "stock reserved");
                return Ok(());
            }

            debug!(sku = %sku.display(), "reserve precondition invalidated, re-reading");
        }

        Err(DbError::conflict(format!("reserve contention on {}", sku.display())).into())
    }

    /// Releases a soft hold: `reserved_quantity -= quantity`, floored at 0.
    ///
    /// Used when an order is cancelled or a reservation is rolled back.
    ///
    /// ## Returns
    /// * `Ok(())` - hold released (possibly less than requested if the hold
    ///   was already smaller)
    /// * `Err(DbError::NotFound)` - no stock line for the SKU key
    pub async fn release(
        &self,
        conn: &mut SqliteConnection,
        sku: &SkuKey,
        quantity: i64,
        order_id: &str,
    ) -> Result<()> {
        validate_quantity(quantity).map_err(CoreError::Validation)?;

        let record = fetch_required(&mut *conn, sku).await?;
        let released = quantity.min(record.reserved_quantity);

        sqlx::query(
            r#"
            UPDATE stock_records SET
                reserved_quantity = MAX(reserved_quantity - ?1, 0),
                version = version + 1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(quantity)
        .bind(Utc::now())
        .bind(&record.id)
        .execute(&mut *conn)
        .await?;

        if released > 0 {
            journal(conn, &record.id, MovementKind::Release, released, None, Some(order_id))
                .await?;
        }
        debug!(sku = %sku.display(), quantity, released, order_id, "reservation released");

        Ok(())
    }

    /// Converts a reservation into a permanent decrement when stock
    /// physically leaves: `quantity -= n` and `reserved_quantity -= n`
    /// together. Available quantity is unchanged by this step.
    ///
    /// ## Returns
    /// * `Ok(())` - outbound committed
    /// * `Err(CoreError::InsufficientStock)` - on-hand < quantity
    /// * `Err(DbError::Conflict)` - precondition kept getting invalidated
    pub async fn commit_outbound(
        &self,
        conn: &mut SqliteConnection,
        sku: &SkuKey,
        quantity: i64,
        order_id: &str,
    ) -> Result<()> {
        validate_quantity(quantity).map_err(CoreError::Validation)?;

        for _attempt in 0..CONDITIONAL_UPDATE_RETRIES {
            let record = fetch_required(&mut *conn, sku).await?;

            if record.quantity < quantity {
                return Err(CoreError::InsufficientStock {
                    sku: sku.display(),
                    available: record.quantity,
                    requested: quantity,
                }
                .into());
            }

            let result = sqlx::query(
                r#"
                UPDATE stock_records SET
                    quantity = quantity - ?1,
                    reserved_quantity = MAX(reserved_quantity - ?1, 0),
                    version = version + 1,
                    updated_at = ?2
                WHERE id = ?3
                  AND quantity >= ?1
                "#,
            )
            .bind(quantity)
            .bind(Utc::now())
            .bind(&record.id)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 1 {
                journal(conn, &record.id, MovementKind::Outbound, -quantity, None, Some(order_id))
                    .await?;
                debug!(sku = %sku.display(), quantity, order_id, "outbound committed");
                return Ok(());
            }

            debug!(sku = %sku.display(), "outbound precondition invalidated, re-reading");
        }

        Err(DbError::conflict(format!("outbound contention on {}", sku.display())).into())
    }

    /// Direct on-hand correction (inbound receipt, cycle count, damage),
    /// independent of any reservation.
    ///
    /// Fails closed: a negative delta may not take `quantity` below
    /// `reserved_quantity` or below zero.
    pub async fn adjust(
        &self,
        conn: &mut SqliteConnection,
        sku: &SkuKey,
        delta: i64,
        reason_code: &str,
    ) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }

        for _attempt in 0..CONDITIONAL_UPDATE_RETRIES {
            let record = fetch_required(&mut *conn, sku).await?;

            let new_quantity = record.quantity + delta;
            if new_quantity < 0 || new_quantity < record.reserved_quantity {
                return Err(CoreError::InsufficientStock {
                    sku: sku.display(),
                    available: record.quantity - record.reserved_quantity,
                    requested: -delta,
                }
                .into());
            }

            let result = sqlx::query(
                r#"
                UPDATE stock_records SET
                    quantity = quantity + ?1,
                    version = version + 1,
                    updated_at = ?2
                WHERE id = ?3
                  AND quantity + ?1 >= reserved_quantity
                  AND quantity + ?1 >= 0
                "#,
            )
            .bind(delta)
            .bind(Utc::now())
            .bind(&record.id)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 1 {
                journal(conn, &record.id, MovementKind::Adjust, delta, Some(reason_code), None)
                    .await?;
                debug!(sku = %sku.display(), delta, reason_code, "stock adjusted");
                return Ok(());
            }

            debug!(sku = %sku.display(), "adjust precondition invalidated, re-reading");
        }

        Err(DbError::conflict(format!("adjust contention on {}", sku.display())).into())
    }
}

// =============================================================================
// Internal Helpers
// =============================================================================

/// Fetches a stock record by SKU key on any executor (pool or transaction).
async fn fetch_by_sku<'e, E>(executor: E, sku: &SkuKey) -> DbResult<Option<StockRecord>>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let record = sqlx::query_as::<_, StockRecord>(&format!(
        "SELECT {STOCK_COLUMNS} FROM stock_records \
         WHERE product_id = ?1 AND variant_id = ?2 AND batch_number = ?3"
    ))
    .bind(&sku.product_id)
    .bind(sku.variant_column())
    .bind(sku.batch_column())
    .fetch_optional(executor)
    .await?;

    Ok(record)
}

async fn fetch_required(conn: &mut SqliteConnection, sku: &SkuKey) -> Result<StockRecord> {
    fetch_by_sku(&mut *conn, sku)
        .await?
        .ok_or_else(|| Error::Db(DbError::not_found("StockRecord", sku.display())))
}

/// Appends a movement row in the caller's transaction.
async fn journal(
    conn: &mut SqliteConnection,
    stock_id: &str,
    kind: MovementKind,
    delta: i64,
    reason_code: Option<&str>,
    order_id: Option<&str>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (id, stock_id, kind, delta, reason_code, order_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(stock_id)
    .bind(kind)
    .bind(delta)
    .bind(reason_code)
    .bind(order_id)
    .bind(Utc::now())
    .execute(conn)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
