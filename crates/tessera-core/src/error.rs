//! # Error Types
//!
//! Domain-specific error types for tessera-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tessera-core errors (this file)                                       │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tessera-db errors (separate crate)                                    │
//! │  ├── DbError          - Persistence failures, Conflict, Timeout        │
//! │  └── LifecycleError   - CoreError + DbError at the boundary contract   │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → LifecycleError → boundary layer   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (SKU, states, quantities)
//! 3. Errors are enum variants, never String
//! 4. Business errors are caller-correctable; they are never retried blindly

use thiserror::Error;

use crate::status::OrderStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations. They are surfaced to the
/// boundary layer as user-facing failures; none of them is transient.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested status change is not an edge in the transition table.
    ///
    /// ## When This Occurs
    /// - Shipping a draft, reopening a cancelled order, etc.
    /// - Usage error on the caller's side; retrying verbatim cannot succeed.
    #[error("invalid order transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Insufficient stock to reserve or ship the requested quantity.
    ///
    /// ## When This Occurs
    /// - Confirming an order whose demand exceeds available quantity
    /// - Shipping more than is on hand (stock drifted via adjustments)
    ///
    /// Retry only makes sense after the caller re-reads stock state.
    #[error("insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        available: i64,
        requested: i64,
    },

    /// A return asks for more than the order originally fulfilled.
    #[error("return of {requested} exceeds fulfilled {fulfilled} for item {item_id}")]
    ReturnExceedsFulfilled {
        item_id: String,
        fulfilled: i64,
        requested: i64,
    },

    /// Validation error (wraps ValidationError).
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These occur when boundary input doesn't meet requirements. Used for early
/// validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
