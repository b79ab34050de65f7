//! # Domain Types
//!
//! Core domain types used throughout the Tessera order core.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   StockRecord   │   │      Order      │   │     Payable     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  sku key        │   │  order_number   │   │  payable_number │       │
//! │  │  quantity       │   │  status         │   │  source_id (FK) │       │
//! │  │  reserved       │   │  total_cents    │   │  amount_cents   │       │
//! │  │  version        │   │  version        │   └─────────────────┘       │
//! │  └─────────────────┘   └─────────────────┘                             │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     SkuKey      │   │  StockMovement  │   │IdempotencyRecord│       │
//! │  │  product_id     │   │  append-only    │   │  write-once     │       │
//! │  │  variant_id?    │   │  journal row    │   │  (key, op, res) │       │
//! │  │  batch_number?  │   │  per mutation   │   │  → result JSON  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business ID: (order_number, payable_number, sku key) - human-readable
//!
//! ## Invariant
//! For every StockRecord at any time: `0 ≤ reserved_quantity ≤ quantity`.
//! The record is mutated only through the inventory ledger; the schema
//! additionally CHECK-enforces the bound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::OrderStatus;

// =============================================================================
// SKU Key
// =============================================================================

/// The (product, variant?, batch?) tuple identifying one stock line.
///
/// ## Storage Normalization
/// SQLite treats NULLs as distinct in UNIQUE indexes, so the optional parts
/// are persisted as empty strings. `variant_column`/`batch_column` produce
/// the normalized form; `None` and `Some("")` are equivalent on purpose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkuKey {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub batch_number: Option<String>,
}

impl SkuKey {
    /// Creates a key for a plain product with no variant or batch.
    pub fn new(product_id: impl Into<String>) -> Self {
        SkuKey {
            product_id: product_id.into(),
            variant_id: None,
            batch_number: None,
        }
    }

    /// Sets the variant component.
    pub fn with_variant(mut self, variant_id: impl Into<String>) -> Self {
        self.variant_id = Some(variant_id.into());
        self
    }

    /// Sets the batch component.
    pub fn with_batch(mut self, batch_number: impl Into<String>) -> Self {
        self.batch_number = Some(batch_number.into());
        self
    }

    /// Normalized variant column value ("" when absent).
    pub fn variant_column(&self) -> &str {
        self.variant_id.as_deref().unwrap_or("")
    }

    /// Normalized batch column value ("" when absent).
    pub fn batch_column(&self) -> &str {
        self.batch_number.as_deref().unwrap_or("")
    }

    /// Human-readable form for error messages: `product[/variant][@batch]`.
    pub fn display(&self) -> String {
        let mut s = self.product_id.clone();
        if let Some(v) = self.variant_id.as_deref().filter(|v| !v.is_empty()) {
            s.push('/');
            s.push_str(v);
        }
        if let Some(b) = self.batch_number.as_deref().filter(|b| !b.is_empty()) {
            s.push('@');
            s.push_str(b);
        }
        s
    }
}

// =============================================================================
// Stock Record
// =============================================================================

/// One inventory-tracked stock line.
///
/// `quantity` is on-hand, `reserved_quantity` is soft-held for confirmed
/// orders; `available()` is what new reservations may claim. `version`
/// increases on every ledger mutation and is the optimistic-lock token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockRecord {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Product this stock line belongs to.
    pub product_id: String,

    /// Variant discriminator; "" when the product has no variants.
    pub variant_id: String,

    /// Production batch; "" when not batch-tracked.
    pub batch_number: String,

    /// On-hand quantity. Never negative.
    pub quantity: i64,

    /// Soft-held quantity. Always within [0, quantity].
    pub reserved_quantity: i64,

    /// Optimistic-lock token, bumped by every ledger mutation.
    pub version: i64,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// Quantity a new reservation may claim.
    #[inline]
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved_quantity
    }

    /// Reconstructs the SKU key from the normalized columns.
    pub fn sku(&self) -> SkuKey {
        SkuKey {
            product_id: self.product_id.clone(),
            variant_id: (!self.variant_id.is_empty()).then(|| self.variant_id.clone()),
            batch_number: (!self.batch_number.is_empty()).then(|| self.batch_number.clone()),
        }
    }
}

// =============================================================================
// Stock Movement
// =============================================================================

/// What kind of ledger mutation produced a movement row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Reservation placed (reserved += delta).
    Reserve,
    /// Reservation released (reserved -= delta).
    Release,
    /// Stock physically left (quantity and reserved both -= delta).
    Outbound,
    /// Direct on-hand correction (inbound receipt, audit count).
    Adjust,
}

/// Append-only journal row written by every ledger mutation, in the same
/// transaction as the mutation it records. Reporting over the journal is a
/// collaborator concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    pub id: String,
    pub stock_id: String,
    pub kind: MovementKind,
    /// Signed effect on the touched column(s); positive for reserve/inbound.
    pub delta: i64,
    /// Caller-supplied reason for adjustments ("cycle_count", "damage", ...).
    pub reason_code: Option<String>,
    /// Originating order for reserve/release/outbound movements.
    pub order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Order
// =============================================================================

/// A customer order.
///
/// Created in `draft`; mutated only via OrderLifecycle transitions; never
/// hard-deleted by this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: String,
    /// Allocator-issued business number; unique and immutable after creation.
    pub order_number: String,
    pub status: OrderStatus,
    pub customer_id: String,
    /// Set when the order is sourced from a supplier (drop-ship / backfill).
    pub supplier_id: Option<String>,
    /// Sell-side total in cents.
    pub total_cents: i64,
    /// Buy-side cost in cents; drives payable derivation on confirm.
    pub cost_cents: i64,
    /// Actor who created the order.
    pub created_by: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Bumped on every lifecycle transition.
    pub version: i64,
}

impl Order {
    /// Whether confirming this order must derive a supplier payable.
    #[inline]
    pub fn derives_payable(&self) -> bool {
        self.supplier_id.is_some() && self.cost_cents > 0
    }
}

// =============================================================================
// Order Item
// =============================================================================

/// A line item on an order.
/// Uses the snapshot pattern to freeze catalog data at order time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    /// Normalized variant column ("" when absent).
    pub variant_id: String,
    /// Normalized batch column ("" when absent).
    pub batch_number: String,
    /// SKU text at order time (frozen).
    pub sku_snapshot: String,
    /// Product name at order time (frozen).
    pub name_snapshot: String,
    /// Quantity ordered.
    pub quantity: i64,
    /// Unit price in cents at order time (frozen).
    pub unit_price_cents: i64,
    /// Unit cost in cents; 0 for non-supplier lines.
    pub cost_cents: i64,
    /// False for manual lines (services, freight) with no ledger effect.
    pub stock_tracked: bool,
    /// Quantity actually shipped; set when the order ships.
    pub fulfilled_quantity: i64,
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    /// The stock line this item draws from.
    pub fn sku(&self) -> SkuKey {
        SkuKey {
            product_id: self.product_id.clone(),
            variant_id: (!self.variant_id.is_empty()).then(|| self.variant_id.clone()),
            batch_number: (!self.batch_number.is_empty()).then(|| self.batch_number.clone()),
        }
    }

    /// Line total before any order-level adjustment.
    #[inline]
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * self.quantity
    }
}

// =============================================================================
// Derived Payable
// =============================================================================

/// Payment lifecycle of a payable. Only `Open` is produced by this core;
/// application of payments is out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum PayableStatus {
    Open,
    Settled,
}

/// A supplier payable derived from confirming a supplier-sourced order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Payable {
    pub id: String,
    /// Allocator-issued business number (AP prefix).
    pub payable_number: String,
    /// The originating order.
    pub source_id: String,
    pub supplier_id: String,
    pub amount_cents: i64,
    pub status: PayableStatus,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Idempotency Record
// =============================================================================

/// Write-once record of a guarded operation's outcome.
///
/// Identity is the composite `(idem_key, operation_type, resource_id)`.
/// Created in the same transaction as the operation's own writes; read-only
/// afterward until expiry; never updated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct IdempotencyRecord {
    pub idem_key: String,
    pub operation_type: String,
    pub resource_id: String,
    /// Digest of the request input; a reused key with a different digest is
    /// rejected loudly rather than served a stale result.
    pub input_fingerprint: String,
    /// The stored outcome, as JSON.
    pub result: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Domain Event & Summaries
// =============================================================================

/// Structured event emitted after a successful status transition.
/// Delivery/transport belongs to the (out-of-scope) publishing collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub order_number: String,
    pub previous_status: OrderStatus,
    pub new_status: OrderStatus,
    pub customer_id: String,
    pub actor_id: String,
}

/// Compact order view returned to the boundary layer after a transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub customer_id: String,
    pub total_cents: i64,
    pub cost_cents: i64,
    pub version: i64,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        OrderSummary {
            id: order.id.clone(),
            order_number: order.order_number.clone(),
            status: order.status,
            customer_id: order.customer_id.clone(),
            total_cents: order.total_cents,
            cost_cents: order.cost_cents,
            version: order.version,
        }
    }
}

/// One line of a return request: how much of an item came back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnLine {
    pub order_item_id: String,
    pub quantity: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================
