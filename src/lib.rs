//! VeilChain - Verifiable Append-Only Ledger Engine
//!
//! Clients create named ledgers, append opaque data entries, and obtain
//! inclusion proofs verifiable offline against a published root hash. Any
//! two roots published over a ledger's lifetime are provably consistent:
//! the later ledger is a strict append-only extension of the earlier.
//!
//! ## Components
//!
//! 1. **Merkle engine** - binary tree with deterministic hashing, inclusion
//!    proofs, batch proofs, consistency proofs
//! 2. **Ledger service** - binds entries to positions with cryptographic
//!    chaining, mediates appends through storage, caches tree state, emits
//!    events
//! 3. **Idempotency layer** - at-most-once append per `(ledger, key)`
//! 4. **Canonical serialization** - deterministic JSON/CBOR for leaf
//!    hashing and proof transport
//! 5. **Tiered storage** - small rows inline, large payloads offloaded with
//!    content-addressed references and integrity checks on read
//! 6. **Root publisher** - threshold-driven snapshots with history and
//!    external anchor hooks
//!
//! The HTTP/WebSocket surface, auth, and the verification SDK live outside
//! this crate; the storage contract, event bus, and anchor hook are their
//! seams.

pub mod canonical;
pub mod common;
pub mod config;
pub mod hash;
pub mod idempotency;
pub mod ledger;
pub mod logging;
pub mod merkle;
pub mod publisher;
pub mod storage;
pub mod types;

// Re-exports: hash primitives
pub use hash::{
    entry_id_from_hash, hash_entry, hash_pair, is_valid_hash, sha256_hex, HashAlgorithm,
    GENESIS_HASH,
};

// Re-exports: Merkle engine
pub use merkle::{
    verify_batch_proof, verify_consistency_proof, verify_inclusion, BatchProof, ConsistencyProof,
    Direction, InclusionProof, MerkleError, MerkleTree,
};

// Re-exports: ledger service
pub use ledger::{AppendOptions, EventBus, LedgerError, LedgerService, LedgerServiceConfig};

// Re-exports: core records
pub use types::{AppendResult, LedgerEntry, LedgerEvent, LedgerMetadata};

// Re-exports: storage
pub use storage::{
    BlobStore, FsBlobStore, LedgerStore, MemoryBlobStore, MemoryLedgerStore, SqliteLedgerStore,
    StorageError, TieredStore,
};

// Re-exports: idempotency
pub use idempotency::{IdempotencyStore, MemoryIdempotencyStore, SqliteIdempotencyStore};

// Re-exports: root publication
pub use publisher::{
    AnchorHook, MemoryRootHistoryStore, PublishPolicy, PublishedRoot, RootHistoryStore,
    RootPublisher, SqliteRootHistoryStore,
};

// Re-exports: configuration and errors
pub use common::error::VeilChainError;
pub use config::VeilChainConfig;
