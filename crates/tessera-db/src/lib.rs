//! # tessera-db: Persistence and Orchestration for the Tessera Order Core
//!
//! SQLite-backed implementation of the concurrency-safe order core:
//!
//! - [`sequence::SequenceAllocator`] - collision-free day-scoped business
//!   numbers via optimistic insert + jittered retry
//! - [`repository::InventoryLedger`] - reserve/release/outbound/adjust with
//!   conditional-update optimistic concurrency; the only writer of stock rows
//! - [`repository::IdempotencyGuard`] - at-most-once side effects for
//!   client-retried requests, recorded in the same commit
//! - [`lifecycle::OrderLifecycle`] - the status machine orchestrator
//! - [`uow::UnitOfWork`] - the atomic commit/rollback boundary with deadline
//!
//! Correctness holds across independent service instances sharing only the
//! database file: there are no in-process locks or caches; every guarantee
//! comes from the store's transactions plus conditional updates.
//!
//! ## Entry Point
//! ```rust,ignore
//! let db = Database::new(DbConfig::new("./tessera.db")).await?;
//! let lifecycle = db.lifecycle();
//!
//! let summary = lifecycle.create_order(request, "client-key-1").await?;
//! let outcome = lifecycle
//!     .transition(TransitionRequest {
//!         order_id: summary.id,
//!         target: OrderStatus::Confirmed,
//!         actor_id: "user-7".into(),
//!         idempotency_key: "client-key-2".into(),
//!         returns: vec![],
//!     })
//!     .await?;
//! // outcome.affected_product_ids → cache invalidation collaborator
//! // outcome.event               → event publishing collaborator
//! ```

pub mod error;
pub mod lifecycle;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod sequence;
pub mod uow;

pub use error::{DbError, DbResult, Error, Result};
pub use lifecycle::{NewOrder, NewOrderItem, OrderLifecycle, TransitionOutcome, TransitionRequest};
pub use pool::{Database, DbConfig};
pub use repository::{IdempotencyGuard, IdempotencyScope, InventoryLedger, OrderRepository, PayableRepository};
pub use sequence::{AllocatorConfig, SequenceAllocator, SequenceKind};
pub use uow::UnitOfWork;
