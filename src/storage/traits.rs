//! Storage Trait Definitions
//!
//! Defines the abstract persistence interface for ledger metadata and
//! entries. Implementations can use SQLite (production) or in-memory
//! (testing); the ledger service depends only on this contract.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{LedgerEntry, LedgerMetadata, LedgerMetadataPatch};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("position conflict: {0}")]
    Conflict(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Ledger persistence interface
///
/// Implementations:
/// - `SqliteLedgerStore` - production storage with SQLite
/// - `MemoryLedgerStore` - in-memory storage for testing
/// - `TieredStore` - decorator offloading large payloads to a blob store
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create metadata for a new ledger. Fails with `Duplicate` if the id
    /// already exists.
    async fn create_ledger(&self, meta: &LedgerMetadata) -> StorageResult<()>;

    /// Apply a partial metadata update.
    async fn update_ledger(&self, id: &str, patch: LedgerMetadataPatch) -> StorageResult<()>;

    /// Get ledger metadata by id.
    async fn get_ledger(&self, id: &str) -> StorageResult<Option<LedgerMetadata>>;

    /// List ledgers ordered by creation time.
    async fn list_ledgers(&self, offset: u64, limit: u64) -> StorageResult<Vec<LedgerMetadata>>;

    /// Delete a ledger and all of its entries. Returns false if absent.
    async fn delete_ledger(&self, id: &str) -> StorageResult<bool>;

    /// Persist an entry. MUST fail with `Conflict` when an entry already
    /// occupies that position — the concurrency backstop for writers that
    /// bypass the per-ledger lock.
    async fn put_entry(&self, ledger_id: &str, entry: &LedgerEntry) -> StorageResult<()>;

    /// Get an entry by its identifier.
    async fn get_entry(&self, ledger_id: &str, entry_id: &str)
        -> StorageResult<Option<LedgerEntry>>;

    /// Get an entry by its position.
    async fn get_entry_by_position(
        &self,
        ledger_id: &str,
        position: u64,
    ) -> StorageResult<Option<LedgerEntry>>;

    /// List entries ordered by position ascending.
    async fn list_entries(
        &self,
        ledger_id: &str,
        offset: u64,
        limit: u64,
    ) -> StorageResult<Vec<LedgerEntry>>;

    /// The ordered leaf-hash sequence, used for tree reconstruction.
    async fn leaf_hashes(&self, ledger_id: &str) -> StorageResult<Vec<String>>;
}
