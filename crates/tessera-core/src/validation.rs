//! # Validation Module
//!
//! Business rule validation for the order core.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Web boundary (out of scope)                                  │
//! │  ├── Form/schema validation, auth checks                               │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE (pure business rules)                            │
//! │  ├── Quantity bounds, item-count bounds                                │
//! │  └── Return-never-exceeds-fulfilled invariant                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / UNIQUE / foreign keys                                  │
//! │  └── CHECK (0 <= reserved_quantity <= quantity)                        │
//! │                                                                         │
//! │  Defense in depth: multiple layers catch different errors              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{OrderItem, ReturnLine};
use crate::{MAX_IDEMPOTENCY_KEY_LEN, MAX_ITEM_QUANTITY, MAX_ORDER_ITEMS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Scalar Validators
// =============================================================================

/// Validates a line-item quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price or cost in cents.
///
/// ## Rules
/// - Must be non-negative (>= 0); zero is allowed (samples, freight-only lines)
pub fn validate_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a caller-supplied idempotency key.
///
/// ## Rules
/// - Must not be empty
/// - Must be at most MAX_IDEMPOTENCY_KEY_LEN characters
pub fn validate_idempotency_key(key: &str) -> ValidationResult<()> {
    let key = key.trim();

    if key.is_empty() {
        return Err(ValidationError::Required {
            field: "idempotency_key".to_string(),
        });
    }

    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "idempotency_key".to_string(),
            max: MAX_IDEMPOTENCY_KEY_LEN,
        });
    }

    Ok(())
}

/// Validates a UUID string format.
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Order-Level Validators
// =============================================================================

/// Validates the line items of an order before creation.
///
/// ## Rules
/// - At least one item, at most MAX_ORDER_ITEMS
/// - Every quantity within bounds, every price/cost non-negative
pub fn validate_order_items(items: &[OrderItem]) -> ValidationResult<()> {
    if items.is_empty() {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        });
    }

    if items.len() > MAX_ORDER_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_ORDER_ITEMS as i64,
        });
    }

    for item in items {
        validate_quantity(item.quantity)?;
        validate_cents("unit_price", item.unit_price_cents)?;
        validate_cents("cost", item.cost_cents)?;
    }

    Ok(())
}

/// Validates a return request against what the order actually fulfilled.
///
/// A pure invariant check: the `completed → returned` transition performs no
/// ledger mutation, so this is the only gate.
///
/// ## Rules
/// - Every return line must reference an item of the order
/// - Returned quantity must be positive
/// - Returned quantity must not exceed the item's fulfilled quantity
pub fn validate_return_lines(items: &[OrderItem], returns: &[ReturnLine]) -> CoreResult<()> {
    for line in returns {
        validate_quantity(line.quantity).map_err(CoreError::Validation)?;

        let item = items
            .iter()
            .find(|i| i.id == line.order_item_id)
            .ok_or_else(|| {
                CoreError::Validation(ValidationError::InvalidFormat {
                    field: "order_item_id".to_string(),
                    reason: format!("{} is not an item of this order", line.order_item_id),
                })
            })?;

        if line.quantity > item.fulfilled_quantity {
            return Err(CoreError::ReturnExceedsFulfilled {
                item_id: item.id.clone(),
                fulfilled: item.fulfilled_quantity,
                requested: line.quantity,
            });
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: &str, quantity: i64, fulfilled: i64) -> OrderItem {
        OrderItem {
            id: id.to_string(),
            order_id: "o1".to_string(),
            product_id: "p1".to_string(),
            variant_id: String::new(),
            batch_number: String::new(),
            sku_snapshot: "TILE-1".to_string(),
            name_snapshot: "Tile".to_string(),
            quantity,
            unit_price_cents: 500,
            cost_cents: 300,
            stock_tracked: true,
            fulfilled_quantity: fulfilled,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_ITEM_QUANTITY).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(MAX_ITEM_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_cents() {
        assert!(validate_cents("price", 0).is_ok());
        assert!(validate_cents("price", 1099).is_ok());
        assert!(validate_cents("price", -100).is_err());
    }

    #[test]
    fn test_validate_idempotency_key() {
        assert!(validate_idempotency_key("retry-abc-123").is_ok());
        assert!(validate_idempotency_key("").is_err());
        assert!(validate_idempotency_key("   ").is_err());
        assert!(validate_idempotency_key(&"k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("id", "").is_err());
        assert!(validate_uuid("id", "not-a-uuid").is_err());
    }

    #[test]
    fn test_validate_order_items() {
        assert!(validate_order_items(&[item("i1", 10, 0)]).is_ok());
        assert!(validate_order_items(&[]).is_err());
        assert!(validate_order_items(&[item("i1", 0, 0)]).is_err());
    }

    #[test]
    fn test_return_within_fulfilled_passes() {
        let items = vec![item("i1", 20, 20)];
        let returns = vec![ReturnLine {
            order_item_id: "i1".to_string(),
            quantity: 5,
        }];
        assert!(validate_return_lines(&items, &returns).is_ok());
    }

    #[test]
    fn test_return_exceeding_fulfilled_fails() {
        let items = vec![item("i1", 20, 20)];
        let returns = vec![ReturnLine {
            order_item_id: "i1".to_string(),
            quantity: 21,
        }];
        let err = validate_return_lines(&items, &returns).unwrap_err();
        assert!(matches!(err, CoreError::ReturnExceedsFulfilled { .. }));
    }

    #[test]
    fn test_return_unknown_item_fails() {
        let items = vec![item("i1", 20, 20)];
        let returns = vec![ReturnLine {
            order_item_id: "missing".to_string(),
            quantity: 1,
        }];
        assert!(validate_return_lines(&items, &returns).is_err());
    }
}
