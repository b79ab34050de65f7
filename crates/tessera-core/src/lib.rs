//! # tessera-core: Pure Business Logic for the Tessera Order Core
//!
//! This crate is the **heart** of the Tessera order subsystem. It contains
//! all business rules as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Tessera Order Core Architecture                    │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Web Boundary Layer (out of scope)                  │   │
//! │  │    validates input ──► calls OrderLifecycle ──► publishes      │   │
//! │  │    events / invalidates caches from the returned outcome       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tessera-db (Database Layer)                  │   │
//! │  │    InventoryLedger • SequenceAllocator • IdempotencyGuard      │   │
//! │  │    OrderLifecycle • UnitOfWork • SQLite repositories           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tessera-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  status   │  │validation │  │   error   │  │   │
//! │  │   │   Order   │  │ OrderStatus│ │   rules   │  │ CoreError │  │   │
//! │  │   │StockRecord│  │ transition │ │  checks   │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Order, OrderItem, StockRecord, Payable, ...)
//! - [`status`] - The order status machine with an explicit transition table
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Quantities**: Stock counts and money are i64 (cents), never floats
//! 4. **Explicit Errors**: All errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use tessera_core::status::OrderStatus;
//!
//! // The transition table is closed: every pair is either allowed or rejected
//! assert!(OrderStatus::Draft.can_transition(OrderStatus::Confirmed));
//! assert!(!OrderStatus::Shipped.can_transition(OrderStatus::Draft));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod status;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use tessera_core::Order` instead of
// `use tessera_core::types::Order`

pub use error::{CoreError, CoreResult, ValidationError};
pub use status::OrderStatus;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum line items allowed on a single order
///
/// ## Business Reason
/// Distribution orders are large but bounded; this prevents runaway payloads
/// from the boundary layer and keeps transition transactions short.
pub const MAX_ORDER_ITEMS: usize = 200;

/// Maximum quantity of a single line item
///
/// ## Business Reason
/// Tile quantities are counted in pieces/boxes; five digits covers a full
/// truckload while catching fat-finger entries (e.g. 100000 instead of 1000).
pub const MAX_ITEM_QUANTITY: i64 = 99_999;

/// Maximum accepted length of a caller-supplied idempotency key
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
