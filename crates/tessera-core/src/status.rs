//! # Order Status Machine
//!
//! The closed set of order states and the explicit transition table that
//! governs them. Every state-changing entry point consults this table before
//! any side effect runs.
//!
//! ## State Diagram
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Order Status Transitions                          │
//! │                                                                         │
//! │   draft ──────► confirmed ──────► shipped ──────► completed            │
//! │     │               │                                  │                │
//! │     │               │                                  ▼                │
//! │     │               │                              returned             │
//! │     ▼               ▼                                                   │
//! │  cancelled      cancelled                                               │
//! │                                                                         │
//! │  Terminal: cancelled, returned                                          │
//! │  (completed is terminal except toward returned)                         │
//! │                                                                         │
//! │  Side effects per edge (executed by OrderLifecycle in one transaction): │
//! │  draft → confirmed      reserve stock, derive payable if supplier cost  │
//! │  confirmed → cancelled  release reservations                            │
//! │  confirmed → shipped    commit outbound (quantity and reserved drop)    │
//! │  shipped → completed    stamp completion only                           │
//! │  completed → returned   pure invariant check, no ledger effect          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Order Status
// =============================================================================

/// The status of an order.
///
/// Stored as lowercase text in the database; the set is closed, so adding a
/// state means extending the transition table below and every match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order is being assembled; no stock is held.
    Draft,
    /// Stock is reserved; a supplier payable may have been derived.
    Confirmed,
    /// Stock has physically left; reservation converted to a decrement.
    Shipped,
    /// Fulfilled and closed out.
    Completed,
    /// Abandoned from draft or confirmed; reservations released.
    Cancelled,
    /// Goods came back after completion.
    Returned,
}

/// The full transition table: (from, to) pairs that are allowed.
///
/// Everything not listed here is rejected. Kept as data rather than logic so
/// the whole state machine is reviewable at a glance.
const TRANSITIONS: &[(OrderStatus, OrderStatus)] = &[
    (OrderStatus::Draft, OrderStatus::Confirmed),
    (OrderStatus::Draft, OrderStatus::Cancelled),
    (OrderStatus::Confirmed, OrderStatus::Shipped),
    (OrderStatus::Confirmed, OrderStatus::Cancelled),
    (OrderStatus::Shipped, OrderStatus::Completed),
    (OrderStatus::Completed, OrderStatus::Returned),
];

impl OrderStatus {
    /// Checks whether `self → target` appears in the transition table.
    pub fn can_transition(self, target: OrderStatus) -> bool {
        TRANSITIONS.contains(&(self, target))
    }

    /// Returns the targets reachable from this status.
    pub fn allowed_targets(self) -> Vec<OrderStatus> {
        TRANSITIONS
            .iter()
            .filter(|(from, _)| *from == self)
            .map(|(_, to)| *to)
            .collect()
    }

    /// A status with no outgoing edges.
    pub fn is_terminal(self) -> bool {
        TRANSITIONS.iter().all(|(from, _)| *from != self)
    }

    /// The lowercase database/text representation.
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Returned => "returned",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Draft
    }
}

// =============================================================================
// Transition Check
// =============================================================================

/// Validates a requested transition, rejecting before any side effect runs.
///
/// ## Returns
/// * `Ok(())` - the edge exists in the table
/// * `Err(CoreError::InvalidTransition)` - usage error, not retryable
pub fn check_transition(from: OrderStatus, to: OrderStatus) -> CoreResult<()> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_edges() {
        assert!(OrderStatus::Draft.can_transition(OrderStatus::Confirmed));
        assert!(OrderStatus::Confirmed.can_transition(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_transition(OrderStatus::Completed));
        assert!(OrderStatus::Completed.can_transition(OrderStatus::Returned));
    }

    #[test]
    fn test_cancellation_edges() {
        assert!(OrderStatus::Draft.can_transition(OrderStatus::Cancelled));
        assert!(OrderStatus::Confirmed.can_transition(OrderStatus::Cancelled));
        assert!(!OrderStatus::Shipped.can_transition(OrderStatus::Cancelled));
        assert!(!OrderStatus::Completed.can_transition(OrderStatus::Cancelled));
    }

    #[test]
    fn test_rejected_edges() {
        assert!(!OrderStatus::Shipped.can_transition(OrderStatus::Draft));
        assert!(!OrderStatus::Draft.can_transition(OrderStatus::Shipped));
        assert!(!OrderStatus::Draft.can_transition(OrderStatus::Completed));
        assert!(!OrderStatus::Cancelled.can_transition(OrderStatus::Draft));
        assert!(!OrderStatus::Returned.can_transition(OrderStatus::Completed));
        // Self-loops are not in the table either
        assert!(!OrderStatus::Draft.can_transition(OrderStatus::Draft));
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Returned.is_terminal());
        assert!(!OrderStatus::Draft.is_terminal());
        assert!(!OrderStatus::Completed.is_terminal());
    }

    #[test]
    fn test_allowed_targets() {
        let from_draft = OrderStatus::Draft.allowed_targets();
        assert_eq!(
            from_draft,
            vec![OrderStatus::Confirmed, OrderStatus::Cancelled]
        );
        assert!(OrderStatus::Cancelled.allowed_targets().is_empty());
    }

    #[test]
    fn test_check_transition_error_carries_both_states() {
        let err = check_transition(OrderStatus::Shipped, OrderStatus::Draft).unwrap_err();
        match err {
            CoreError::InvalidTransition { from, to } => {
                assert_eq!(from, OrderStatus::Shipped);
                assert_eq!(to, OrderStatus::Draft);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_status_text_round_trip() {
        assert_eq!(OrderStatus::Confirmed.as_str(), "confirmed");
        assert_eq!(OrderStatus::Draft.to_string(), "draft");
    }
}
