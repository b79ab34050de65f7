//! # Repository Modules
//!
//! Data access components for the Tessera order core.
//!
//! ## Access Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Repository Access Pattern                           │
//! │                                                                         │
//! │  Read helpers        run on the pool (their own implicit transaction)  │
//! │  Mutating methods    take &mut SqliteConnection - the caller owns the  │
//! │                      transaction boundary (see crate::uow)             │
//! │                                                                         │
//! │  This split is what makes "order status + inventory + payable +        │
//! │  idempotency record" commit or roll back as one unit.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod idempotency;
pub mod inventory;
pub mod order;
pub mod payable;

pub use idempotency::{IdempotencyGuard, IdempotencyScope};
pub use inventory::InventoryLedger;
pub use order::OrderRepository;
pub use payable::PayableRepository;
