//! Root Publisher
//!
//! Snapshots a ledger's root and entry count into a durable history when a
//! threshold is crossed. Two published snapshots of the same ledger can be
//! bound cryptographically with a consistency proof. External anchor hooks
//! (blockchains, timestamping authorities) are best-effort: their failure
//! never prevents the history record.

mod store;

pub use store::{MemoryRootHistoryStore, SqliteRootHistoryStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::hash::sha256_hex;
use crate::storage::StorageError;
use crate::types::LedgerMetadata;

/// Publisher errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Anchor hook errors
#[derive(Debug, Error)]
#[error("anchor failed: {0}")]
pub struct AnchorError(pub String);

/// A published root snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedRoot {
    /// Identifier, `root_` prefixed.
    pub id: String,
    pub ledger_id: String,
    pub root_hash: String,
    #[serde(with = "crate::types::u64_string")]
    pub entry_count: u64,
    /// Keyed integrity tag over `root_hash:entry_count`, when a signing key
    /// is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(with = "crate::types::iso_millis")]
    pub published_at: DateTime<Utc>,
    /// Reference returned by an external anchor, when one succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_ref: Option<String>,
}

/// History storage for published roots
#[async_trait]
pub trait RootHistoryStore: Send + Sync {
    async fn append(&self, root: &PublishedRoot) -> Result<(), StorageError>;

    /// Most recent snapshot for a ledger.
    async fn latest(&self, ledger_id: &str) -> Result<Option<PublishedRoot>, StorageError>;

    /// Snapshots for a ledger, newest first.
    async fn list(
        &self,
        ledger_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<PublishedRoot>, StorageError>;

    /// Look up a snapshot by its root hash.
    async fn find_by_root_hash(
        &self,
        root_hash: &str,
    ) -> Result<Option<PublishedRoot>, StorageError>;

    /// Attach an anchor reference to an existing snapshot.
    async fn set_anchor_ref(&self, id: &str, anchor_ref: &str) -> Result<(), StorageError>;
}

/// External anchoring seam (out-of-scope consumers implement this).
#[async_trait]
pub trait AnchorHook: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a published root externally; returns an opaque reference.
    async fn anchor(&self, root: &PublishedRoot) -> Result<String, AnchorError>;
}

/// When to snapshot.
#[derive(Debug, Clone)]
pub struct PublishPolicy {
    /// Publish once this many entries accumulated since the last snapshot.
    pub min_entries_threshold: u64,
    /// Publish once this much time passed since the last snapshot.
    pub max_time_threshold_ms: i64,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            min_entries_threshold: 100,
            max_time_threshold_ms: 60 * 60 * 1000,
        }
    }
}

impl PublishPolicy {
    /// Decide whether a ledger is due for a snapshot.
    ///
    /// Due when entries since the last publish reach the entry threshold,
    /// the time threshold has elapsed, or this is the first publish and the
    /// ledger is non-empty.
    pub fn should_publish(&self, meta: &LedgerMetadata, last: Option<&PublishedRoot>) -> bool {
        let Some(last) = last else {
            return meta.entry_count > 0;
        };
        if meta.entry_count <= last.entry_count {
            return false;
        }
        if meta.entry_count - last.entry_count >= self.min_entries_threshold {
            return true;
        }
        let elapsed_ms = (Utc::now() - last.published_at).num_milliseconds();
        elapsed_ms >= self.max_time_threshold_ms
    }
}

/// Threshold-driven root snapshot publisher
pub struct RootPublisher {
    history: Arc<dyn RootHistoryStore>,
    policy: PublishPolicy,
    signing_key: Option<Vec<u8>>,
    anchors: Vec<Arc<dyn AnchorHook>>,
}

impl RootPublisher {
    pub fn new(history: Arc<dyn RootHistoryStore>, policy: PublishPolicy) -> Self {
        Self {
            history,
            policy,
            signing_key: None,
            anchors: Vec::new(),
        }
    }

    /// Configure a signing key; snapshots then carry an integrity tag.
    pub fn with_signing_key(mut self, key: Vec<u8>) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// Register an external anchor hook.
    pub fn with_anchor(mut self, anchor: Arc<dyn AnchorHook>) -> Self {
        self.anchors.push(anchor);
        self
    }

    /// Snapshot the ledger if the policy says it is due.
    pub async fn maybe_publish(
        &self,
        meta: &LedgerMetadata,
    ) -> Result<Option<PublishedRoot>, PublishError> {
        let last = self.history.latest(&meta.id).await?;
        if !self.policy.should_publish(meta, last.as_ref()) {
            return Ok(None);
        }
        Ok(Some(self.publish(meta).await?))
    }

    /// Snapshot unconditionally: persist the history record, then run the
    /// anchor hooks. Anchoring failures are logged and swallowed; the first
    /// successful anchor reference is patched onto the stored record.
    pub async fn publish(&self, meta: &LedgerMetadata) -> Result<PublishedRoot, PublishError> {
        let mut root = PublishedRoot {
            id: format!("root_{}", uuid::Uuid::new_v4().simple()),
            ledger_id: meta.id.clone(),
            root_hash: meta.root_hash.clone(),
            entry_count: meta.entry_count,
            signature: self
                .signing_key
                .as_deref()
                .map(|key| sign_root(key, &meta.root_hash, meta.entry_count)),
            published_at: Utc::now(),
            anchor_ref: None,
        };

        self.history.append(&root).await?;
        info!(
            target: "veilchain::publisher",
            ledger_id = %meta.id,
            root = %root.root_hash,
            entry_count = meta.entry_count,
            "root published"
        );

        for anchor in &self.anchors {
            match anchor.anchor(&root).await {
                Ok(anchor_ref) => {
                    if let Err(e) = self.history.set_anchor_ref(&root.id, &anchor_ref).await {
                        warn!(
                            target: "veilchain::publisher",
                            anchor = anchor.name(),
                            error = %e,
                            "failed to store anchor reference"
                        );
                    } else {
                        root.anchor_ref = Some(anchor_ref);
                    }
                    break;
                }
                Err(e) => {
                    warn!(
                        target: "veilchain::publisher",
                        anchor = anchor.name(),
                        error = %e,
                        "external anchor failed"
                    );
                }
            }
        }

        Ok(root)
    }

    pub fn history(&self) -> &Arc<dyn RootHistoryStore> {
        &self.history
    }
}

/// Keyed integrity tag: `sha256(key || root_hash || ":" || entry_count)`.
pub fn sign_root(key: &[u8], root_hash: &str, entry_count: u64) -> String {
    let mut input = Vec::with_capacity(key.len() + root_hash.len() + 24);
    input.extend_from_slice(key);
    input.extend_from_slice(root_hash.as_bytes());
    input.push(b':');
    input.extend_from_slice(entry_count.to_string().as_bytes());
    sha256_hex(&input)
}

/// Check a snapshot's integrity tag.
pub fn verify_root_signature(key: &[u8], root: &PublishedRoot) -> bool {
    root.signature.as_deref() == Some(sign_root(key, &root.root_hash, root.entry_count).as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use chrono::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn meta_with_count(count: u64) -> LedgerMetadata {
        let mut meta = LedgerMetadata::new("audit", None, HashAlgorithm::Sha256);
        meta.entry_count = count;
        meta.root_hash = "ab".repeat(32);
        meta
    }

    fn published(count: u64, age: Duration) -> PublishedRoot {
        PublishedRoot {
            id: "root_x".into(),
            ledger_id: "ledger_x".into(),
            root_hash: "cd".repeat(32),
            entry_count: count,
            signature: None,
            published_at: Utc::now() - age,
            anchor_ref: None,
        }
    }

    #[test]
    fn test_first_publish_requires_entries() {
        let policy = PublishPolicy::default();
        assert!(!policy.should_publish(&meta_with_count(0), None));
        assert!(policy.should_publish(&meta_with_count(1), None));
    }

    #[test]
    fn test_entry_threshold() {
        let policy = PublishPolicy {
            min_entries_threshold: 10,
            max_time_threshold_ms: i64::MAX,
        };
        let last = published(5, Duration::seconds(1));
        assert!(!policy.should_publish(&meta_with_count(14), Some(&last)));
        assert!(policy.should_publish(&meta_with_count(15), Some(&last)));
    }

    #[test]
    fn test_time_threshold() {
        let policy = PublishPolicy {
            min_entries_threshold: u64::MAX,
            max_time_threshold_ms: 60_000,
        };
        let fresh = published(5, Duration::seconds(1));
        let stale = published(5, Duration::minutes(5));
        assert!(!policy.should_publish(&meta_with_count(6), Some(&fresh)));
        assert!(policy.should_publish(&meta_with_count(6), Some(&stale)));
        // Nothing new to publish, regardless of age.
        assert!(!policy.should_publish(&meta_with_count(5), Some(&stale)));
    }

    #[test]
    fn test_signature_round_trip() {
        let key = b"publisher-key".to_vec();
        let mut root = published(7, Duration::seconds(0));
        root.signature = Some(sign_root(&key, &root.root_hash, root.entry_count));
        assert!(verify_root_signature(&key, &root));
        assert!(!verify_root_signature(b"wrong-key", &root));

        root.entry_count = 8;
        assert!(!verify_root_signature(&key, &root));
    }

    struct FailingAnchor;

    #[async_trait]
    impl AnchorHook for FailingAnchor {
        fn name(&self) -> &str {
            "failing"
        }
        async fn anchor(&self, _root: &PublishedRoot) -> Result<String, AnchorError> {
            Err(AnchorError("unreachable chain".into()))
        }
    }

    struct CountingAnchor {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AnchorHook for CountingAnchor {
        fn name(&self) -> &str {
            "counting"
        }
        async fn anchor(&self, root: &PublishedRoot) -> Result<String, AnchorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("anchor:{}", root.root_hash))
        }
    }

    #[tokio::test]
    async fn test_publish_persists_and_signs() {
        let history = Arc::new(MemoryRootHistoryStore::new());
        let publisher = RootPublisher::new(history.clone(), PublishPolicy::default())
            .with_signing_key(b"key".to_vec());

        let meta = meta_with_count(3);
        let root = publisher.publish(&meta).await.unwrap();
        assert!(root.id.starts_with("root_"));
        assert!(verify_root_signature(b"key", &root));

        let latest = history.latest(&meta.id).await.unwrap().unwrap();
        assert_eq!(latest.root_hash, meta.root_hash);
        assert_eq!(latest.entry_count, 3);

        let found = history.find_by_root_hash(&meta.root_hash).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_anchor_failure_does_not_block_record() {
        let history = Arc::new(MemoryRootHistoryStore::new());
        let publisher = RootPublisher::new(history.clone(), PublishPolicy::default())
            .with_anchor(Arc::new(FailingAnchor));

        let meta = meta_with_count(1);
        let root = publisher.publish(&meta).await.unwrap();
        assert!(root.anchor_ref.is_none());
        assert!(history.latest(&meta.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_first_successful_anchor_recorded() {
        let history = Arc::new(MemoryRootHistoryStore::new());
        let counting = Arc::new(CountingAnchor {
            calls: AtomicU32::new(0),
        });
        let publisher = RootPublisher::new(history.clone(), PublishPolicy::default())
            .with_anchor(Arc::new(FailingAnchor))
            .with_anchor(counting.clone());

        let meta = meta_with_count(1);
        let root = publisher.publish(&meta).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert_eq!(root.anchor_ref, Some(format!("anchor:{}", meta.root_hash)));

        let stored = history.latest(&meta.id).await.unwrap().unwrap();
        assert_eq!(stored.anchor_ref, root.anchor_ref);
    }

    #[tokio::test]
    async fn test_maybe_publish_honors_policy() {
        let history = Arc::new(MemoryRootHistoryStore::new());
        let publisher = RootPublisher::new(
            history.clone(),
            PublishPolicy {
                min_entries_threshold: 5,
                max_time_threshold_ms: i64::MAX,
            },
        );

        // First publish: any entries at all.
        let mut meta = meta_with_count(2);
        assert!(publisher.maybe_publish(&meta).await.unwrap().is_some());

        // Below the entry threshold: skipped.
        meta.entry_count = 4;
        assert!(publisher.maybe_publish(&meta).await.unwrap().is_none());

        // Threshold reached: published.
        meta.entry_count = 7;
        assert!(publisher.maybe_publish(&meta).await.unwrap().is_some());
        assert_eq!(history.list(&meta.id, 0, 10).await.unwrap().len(), 2);
    }
}
