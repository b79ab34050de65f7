//! # Order Repository
//!
//! Database operations for orders and order items.
//!
//! The status column is only ever flipped through [`OrderRepository::update_status`],
//! whose WHERE clause re-asserts the expected current status - a concurrent
//! transition on the same order therefore surfaces as a conflict instead of
//! silently double-applying.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tessera_core::{Order, OrderItem, OrderStatus};

const ORDER_COLUMNS: &str = "id, order_number, status, customer_id, supplier_id, \
     total_cents, cost_cents, created_by, notes, created_at, updated_at, completed_at, version";

const ITEM_COLUMNS: &str = "id, order_id, product_id, variant_id, batch_number, \
     sku_snapshot, name_snapshot, quantity, unit_price_cents, cost_cents, \
     stock_tracked, fulfilled_quantity, created_at";

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets an order by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        fetch_order(&self.pool, id).await
    }

    /// Gets an order by its business number.
    pub async fn get_by_number(&self, order_number: &str) -> DbResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = ?1"
        ))
        .bind(order_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    /// Gets all items for an order.
    pub async fn get_items(&self, order_id: &str) -> DbResult<Vec<OrderItem>> {
        fetch_items(&self.pool, order_id).await
    }

    // =========================================================================
    // Mutations (caller-supplied transaction)
    // =========================================================================

    /// Inserts an order together with its items.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - order_number collided; the caller
    ///   (order creation) treats this as retryable and re-allocates
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        order: &Order,
        items: &[OrderItem],
    ) -> DbResult<()> {
        debug!(id = %order.id, order_number = %order.order_number, "inserting order");

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, status, customer_id, supplier_id,
                total_cents, cost_cents, created_by, notes,
                created_at, updated_at, completed_at, version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&order.id)
        .bind(&order.order_number)
        .bind(order.status)
        .bind(&order.customer_id)
        .bind(&order.supplier_id)
        .bind(order.total_cents)
        .bind(order.cost_cents)
        .bind(&order.created_by)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.completed_at)
        .bind(order.version)
        .execute(&mut *conn)
        .await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, product_id, variant_id, batch_number,
                    sku_snapshot, name_snapshot, quantity, unit_price_cents,
                    cost_cents, stock_tracked, fulfilled_quantity, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )
            .bind(&item.id)
            .bind(&item.order_id)
            .bind(&item.product_id)
            .bind(&item.variant_id)
            .bind(&item.batch_number)
            .bind(&item.sku_snapshot)
            .bind(&item.name_snapshot)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .bind(item.cost_cents)
            .bind(item.stock_tracked)
            .bind(item.fulfilled_quantity)
            .bind(item.created_at)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    /// Fetches an order inside the caller's transaction.
    pub async fn fetch(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Order>> {
        fetch_order(&mut *conn, id).await
    }

    /// Fetches an order's items inside the caller's transaction.
    pub async fn fetch_items(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
    ) -> DbResult<Vec<OrderItem>> {
        fetch_items(&mut *conn, order_id).await
    }

    /// Flips the status, conditionally on the expected current status.
    ///
    /// ## Returns
    /// * `Err(DbError::Conflict)` - the order was no longer in `from`
    ///   (a concurrent transition won the race)
    pub async fn update_status(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        from: OrderStatus,
        to: OrderStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = ?3,
                updated_at = ?4,
                completed_at = COALESCE(?5, completed_at),
                version = version + 1
            WHERE id = ?1 AND status = ?2
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(now)
        .bind(completed_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::conflict(format!(
                "order {id} left status {from} during the transition"
            )));
        }

        debug!(id, %from, %to, "order status updated");
        Ok(())
    }

    /// Stamps fulfilled quantities when the order ships.
    pub async fn mark_fulfilled(&self, conn: &mut SqliteConnection, order_id: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE order_items SET fulfilled_quantity = quantity
            WHERE order_id = ?1 AND stock_tracked = 1
            "#,
        )
        .bind(order_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Internal Helpers
// =============================================================================

async fn fetch_order<'e, E>(executor: E, id: &str) -> DbResult<Option<Order>>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let order =
        sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"))
            .bind(id)
            .fetch_optional(executor)
            .await?;

    Ok(order)
}

async fn fetch_items<'e, E>(executor: E, order_id: &str) -> DbResult<Vec<OrderItem>>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let items = sqlx::query_as::<_, OrderItem>(&format!(
        "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ?1 ORDER BY created_at"
    ))
    .bind(order_id)
    .fetch_all(executor)
    .await?;

    Ok(items)
}
