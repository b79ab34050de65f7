//! # Sequence Allocator
//!
//! Collision-free, human-readable business numbers (order numbers, payable
//! numbers) scoped per day and prefix.
//!
//! ## Strategy: Optimistic Insert + Jittered Retry
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   Allocating SO20260806...                              │
//! │                                                                         │
//! │  attempt = 0                                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SELECT MAX(order_number) WHERE order_number LIKE 'SO20260806%'        │
//! │       │  → "SO20260806000041"                                          │
//! │       ▼                                                                 │
//! │  next = 41 + 1 + random(0..=9) + attempt*3 + subsec(0..=4)             │
//! │       │  (offsets spread racing allocators apart)                      │
//! │       ▼                                                                 │
//! │  candidate = "SO20260806000049"                                        │
//! │       │                                                                 │
//! │       ├── pre-check free? ──────────────► return candidate             │
//! │       │                                   (UNIQUE index is the final   │
//! │       │                                    arbiter at commit)          │
//! │       ▼                                                                 │
//! │  taken → sleep(base + attempt*increment + jitter), attempt += 1        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  attempt == 15 → ExhaustedRetries (escalate; NEVER hand out a          │
//! │                  possibly-duplicate number)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! This favors availability over sequential density: gaps in the numeric
//! suffix are expected, and numbers are not strictly increasing under
//! contention. There is deliberately no singleton in-process counter - the
//! system runs as multiple stateless instances sharing only the store.
//!
//! Suffix overflow policy: formatting is zero-padded but never truncating,
//! so a suffix outgrowing the pad width widens. The space resets with every
//! day prefix.

use chrono::Utc;
use rand::Rng;
use sqlx::SqliteConnection;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

// =============================================================================
// Sequence Kinds
// =============================================================================

/// Which business number is being allocated.
///
/// Each kind scans its own table/column; the identifier is reserved by the
/// caller inserting the row that carries it, inside the same transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    /// Sales order numbers: `SO` + YYYYMMDD + suffix.
    OrderNumber,
    /// Derived payable numbers: `AP` + YYYYMMDD + suffix.
    PayableNumber,
}

impl SequenceKind {
    /// The static prefix ahead of the date.
    pub fn prefix(self) -> &'static str {
        match self {
            SequenceKind::OrderNumber => "SO",
            SequenceKind::PayableNumber => "AP",
        }
    }

    fn table(self) -> &'static str {
        match self {
            SequenceKind::OrderNumber => "orders",
            SequenceKind::PayableNumber => "payables",
        }
    }

    fn column(self) -> &'static str {
        match self {
            SequenceKind::OrderNumber => "order_number",
            SequenceKind::PayableNumber => "payable_number",
        }
    }
}

// =============================================================================
// Allocator Configuration
// =============================================================================

/// Retry and formatting knobs for the allocator.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Attempt ceiling before ExhaustedRetries.
    pub max_attempts: u32,

    /// Backoff base delay.
    pub base_delay: Duration,

    /// Extra delay per attempt (linear component of the backoff).
    pub delay_increment: Duration,

    /// Upper bound of the random jitter added to each backoff.
    pub max_jitter: Duration,

    /// Zero-pad width of the numeric suffix.
    pub pad_width: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            max_attempts: 15,
            base_delay: Duration::from_millis(20),
            delay_increment: Duration::from_millis(15),
            max_jitter: Duration::from_millis(25),
            pad_width: 6,
        }
    }
}

// =============================================================================
// Sequence Allocator
// =============================================================================

/// Allocates day-scoped business numbers against the persisted maximum.
#[derive(Debug, Clone, Default)]
pub struct SequenceAllocator {
    config: AllocatorConfig,
}

impl SequenceAllocator {
    /// Creates an allocator with custom retry settings.
    pub fn with_config(config: AllocatorConfig) -> Self {
        SequenceAllocator { config }
    }

    /// Allocates a fresh identifier for `kind`.
    ///
    /// Runs inside the caller's transaction: the scan, the pre-check and the
    /// insert that ultimately reserves the number all share one commit. The
    /// UNIQUE index remains the final arbiter - a duplicate slipping past the
    /// pre-check is rejected at insert, and the caller retries.
    ///
    /// ## Returns
    /// * `Err(DbError::ExhaustedRetries)` - no unique candidate within the
    ///   attempt ceiling; escalate, never fall back to a non-unique value
    pub async fn allocate(
        &self,
        conn: &mut SqliteConnection,
        kind: SequenceKind,
    ) -> DbResult<String> {
        let prefix = format!("{}{}", kind.prefix(), Utc::now().format("%Y%m%d"));

        for attempt in 0..self.config.max_attempts {
            let candidate = self.next_candidate(&mut *conn, kind, &prefix, attempt).await?;

            let taken: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                kind.table(),
                kind.column()
            ))
            .bind(&candidate)
            .fetch_one(&mut *conn)
            .await?;

            if taken == 0 {
                debug!(%candidate, attempt, "sequence candidate allocated");
                return Ok(candidate);
            }

            let delay = self.backoff(attempt);
            warn!(%candidate, attempt, ?delay, "sequence candidate collided, backing off");
            tokio::time::sleep(delay).await;
        }

        Err(DbError::ExhaustedRetries {
            scope: prefix,
            attempts: self.config.max_attempts,
        })
    }

    /// Derives the next candidate from the persisted maximum plus offsets.
    async fn next_candidate(
        &self,
        conn: &mut SqliteConnection,
        kind: SequenceKind,
        prefix: &str,
        attempt: u32,
    ) -> DbResult<String> {
        let max: Option<String> = sqlx::query_scalar(&format!(
            "SELECT MAX({col}) FROM {table} WHERE {col} LIKE ?1",
            col = kind.column(),
            table = kind.table()
        ))
        .bind(format!("{prefix}%"))
        .fetch_one(&mut *conn)
        .await?;

        let last_seq = max
            .as_deref()
            .and_then(|m| parse_suffix(m, prefix))
            .unwrap_or(0);

        // Racing allocators land on the same MAX; the offsets spread their
        // candidates apart so most races resolve without a collision.
        let random_offset = rand::thread_rng().gen_range(0..=9);
        let attempt_offset = i64::from(attempt) * 3;
        let subsec_offset = i64::from(Utc::now().timestamp_subsec_millis() % 5);

        let next = last_seq + 1 + random_offset + attempt_offset + subsec_offset;

        Ok(format_identifier(prefix, next, self.config.pad_width))
    }

    /// Jittered linear backoff: base + attempt*increment + random jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..=self.config.max_jitter.as_millis() as u64);
        self.config.base_delay
            + self.config.delay_increment * attempt
            + Duration::from_millis(jitter_ms)
    }
}

// =============================================================================
// Parsing / Formatting
// =============================================================================

/// Extracts the numeric suffix of an identifier sharing `prefix`.
///
/// Returns None for foreign or malformed identifiers, which the scan then
/// treats as sequence 0.
fn parse_suffix(identifier: &str, prefix: &str) -> Option<i64> {
    let suffix = identifier.strip_prefix(prefix)?;
    if suffix.is_empty() {
        return None;
    }
    suffix.parse().ok()
}

/// Formats `prefix` + zero-padded sequence. Padding widens, never truncates.
fn format_identifier(prefix: &str, seq: i64, pad_width: usize) -> String {
    format!("{prefix}{seq:0pad_width$}")
}

// =============================================================================
// Unit Tests
// =============================================================================
