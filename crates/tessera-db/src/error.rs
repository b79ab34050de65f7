//! # Database Error Types
//!
//! Error types for persistence operations, plus the composite error that
//! forms the boundary contract of ledger and lifecycle calls.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Classifies constraint and lock failures       │
//! │       │                     UNIQUE → UniqueViolation (retryable at     │
//! │       │                     the allocator), locked/busy → Conflict     │
//! │       ▼                                                                 │
//! │  Error (this module) ← DbError | tessera_core::CoreError               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Boundary layer maps: business errors → user-correctable message,      │
//! │  Conflict/Timeout → "try again", ExhaustedRetries → operational alarm  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Policy
//! Nothing here auto-retries. `Conflict` and `Timeout` are marked retryable
//! so callers can decide; every other kind propagates untouched. This core
//! never swallows an error to produce a default/zero result.

use std::time::Duration;

use thiserror::Error;

use tessera_core::CoreError;

// =============================================================================
// DbError
// =============================================================================

/// Persistence-layer errors.
///
/// These wrap sqlx errors and provide categorization the retry policy
/// depends on.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Two allocator candidates collide on an order/payable number
    /// - Duplicate SKU key insert
    #[error("duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A concurrent writer invalidated a conditional update, or SQLite
    /// refused a lock upgrade. Safe to retry the whole operation.
    #[error("concurrent modification conflict: {message}")]
    Conflict { message: String },

    /// The unit-of-work deadline elapsed; the transaction was rolled back.
    /// Safe to retry.
    #[error("transaction deadline exceeded after {0:?}")]
    Timeout(Duration),

    /// Sequence allocation gave up after the attempt ceiling.
    ///
    /// Escalate: never fall back to a possibly-duplicate identifier.
    #[error("sequence allocation exhausted {attempts} attempts for prefix {scope}")]
    ExhaustedRetries { scope: String, attempts: u32 },

    /// An idempotency key was reused with materially different input.
    ///
    /// Serving the stored result would hide a caller bug, so this fails
    /// loudly instead.
    #[error("idempotency key '{key}' reused with different input for {operation_type}")]
    KeyReuseMismatch { key: String, operation_type: String },

    /// Database connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Stored idempotency payload could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Internal database error.
    #[error("internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        DbError::Conflict {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the whole operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::Conflict { .. } | DbError::Timeout(_))
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → UNIQUE → UniqueViolation
///                               FOREIGN KEY → ForeignKeyViolation
///                               locked/busy → Conflict (retryable)
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
///
/// The locked/busy classification matters: under WAL a writer that lost the
/// race to upgrade its snapshot gets "database is locked", which for this
/// design is precisely a conditional-update conflict.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                if msg.contains("UNIQUE constraint failed") {
                    // "UNIQUE constraint failed: <table>.<column>"
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("locked") || msg.contains("busy") {
                    DbError::Conflict {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for persistence-only operations.
pub type DbResult<T> = std::result::Result<T, DbError>;

// =============================================================================
// Composite Error
// =============================================================================

/// The typed error surfaced by ledger and lifecycle operations - the
/// boundary contract: business errors from tessera-core on one side,
/// persistence/concurrency errors on the other.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl Error {
    /// Business errors are never blindly retryable; persistence errors
    /// delegate to [`DbError::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Core(_) => false,
            Error::Db(e) => e.is_retryable(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Db(DbError::from(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Db(DbError::from(err))
    }
}

/// Result type for operations crossing business and persistence concerns.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::OrderStatus;

    #[test]
    fn test_retryable_classification() {
        assert!(DbError::conflict("lost the race").is_retryable());
        assert!(DbError::Timeout(Duration::from_secs(5)).is_retryable());

        assert!(!DbError::not_found("Order", "o1").is_retryable());
        assert!(!DbError::ExhaustedRetries {
            scope: "SO20260806".into(),
            attempts: 15
        }
        .is_retryable());
    }

    #[test]
    fn test_composite_never_retries_business_errors() {
        let err = Error::Core(CoreError::InvalidTransition {
            from: OrderStatus::Shipped,
            to: OrderStatus::Draft,
        });
        assert!(!err.is_retryable());

        let err = Error::Db(DbError::conflict("busy"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
