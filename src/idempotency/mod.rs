//! Idempotency Cache
//!
//! Guarantees at-most-once append per `(ledger, key)`: the full append
//! result is cached under the caller-supplied key and replayed verbatim
//! within the TTL window. Keys are scoped per ledger; expired records read
//! as absent. Records are created once and never mutated.

mod memory;
mod sqlite;

pub use memory::MemoryIdempotencyStore;
pub use sqlite::SqliteIdempotencyStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::storage::StorageResult;
use crate::types::AppendResult;

/// Default record lifetime: 24 hours.
pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

/// Idempotency record storage interface
///
/// Implementations:
/// - `SqliteIdempotencyStore` - durable, upsert on `(ledger_id, key)`
/// - `MemoryIdempotencyStore` - in-memory, used in tests
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Look up a cached result. Expired records are treated as absent.
    async fn get(&self, ledger_id: &str, key: &str) -> StorageResult<Option<AppendResult>>;

    /// Cache a result until `expires_at`. A record already present for this
    /// `(ledger, key)` wins; it is never overwritten.
    async fn set(
        &self,
        ledger_id: &str,
        key: &str,
        result: &AppendResult,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Remove one record. Returns false if absent.
    async fn delete(&self, ledger_id: &str, key: &str) -> StorageResult<bool>;

    /// Purge expired records; returns the count removed.
    async fn cleanup(&self) -> StorageResult<u64>;
}
