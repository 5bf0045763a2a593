//! Tiered Storage Decorator
//!
//! Wraps a primary `LedgerStore` and a `BlobStore`: payloads below the size
//! threshold persist inline, larger ones are offloaded and replaced by a
//! content-addressed blob reference. Reads rehydrate transparently and fail
//! with an integrity error when the blob bytes no longer match the reference
//! hash. Leaf hashes, parent hashes, positions and ids are never touched.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::blob::{BlobStats, BlobStore};
use super::traits::{LedgerStore, StorageError, StorageResult};
use crate::canonical::canonical_json_bytes;
use crate::hash::sha256_hex;
use crate::types::{BlobRef, LedgerEntry, LedgerMetadata, LedgerMetadataPatch};

const BLOB_CONTENT_TYPE: &str = "application/json";

/// Count and bytes per storage tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TieredStats {
    pub inline_count: u64,
    pub inline_bytes: u64,
    pub blob_count: u64,
    pub blob_bytes: u64,
}

/// Size-routing decorator over a primary store and a blob store.
pub struct TieredStore {
    primary: Arc<dyn LedgerStore>,
    blobs: Arc<dyn BlobStore>,
    size_threshold: u64,
    inline: RwLock<BlobStats>,
}

impl TieredStore {
    pub fn new(
        primary: Arc<dyn LedgerStore>,
        blobs: Arc<dyn BlobStore>,
        size_threshold: u64,
    ) -> Self {
        Self {
            primary,
            blobs,
            size_threshold,
            inline: RwLock::new(BlobStats::default()),
        }
    }

    /// Per-tier statistics: inline counters plus the blob store's own.
    pub async fn stats(&self) -> StorageResult<TieredStats> {
        let inline = *self.inline.read().await;
        let blob = self.blobs.stats().await?;
        Ok(TieredStats {
            inline_count: inline.count,
            inline_bytes: inline.total_bytes,
            blob_count: blob.count,
            blob_bytes: blob.total_bytes,
        })
    }

    /// Replace a blob reference with the original payload, verifying the
    /// content hash first.
    async fn rehydrate(&self, ledger_id: &str, mut entry: LedgerEntry) -> StorageResult<LedgerEntry> {
        let Some(blob_ref) = BlobRef::from_value(&entry.data) else {
            return Ok(entry);
        };

        let (bytes, _meta) = self.blobs.get(ledger_id, &entry.id).await?;
        let actual = sha256_hex(&bytes);
        if actual != blob_ref.content_hash {
            return Err(StorageError::Integrity(format!(
                "blob content hash mismatch for {}/{}: stored {} got {}",
                ledger_id, entry.id, blob_ref.content_hash, actual
            )));
        }

        entry.data = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        Ok(entry)
    }
}

#[async_trait]
impl LedgerStore for TieredStore {
    async fn create_ledger(&self, meta: &LedgerMetadata) -> StorageResult<()> {
        self.primary.create_ledger(meta).await
    }

    async fn update_ledger(&self, id: &str, patch: LedgerMetadataPatch) -> StorageResult<()> {
        self.primary.update_ledger(id, patch).await
    }

    async fn get_ledger(&self, id: &str) -> StorageResult<Option<LedgerMetadata>> {
        self.primary.get_ledger(id).await
    }

    async fn list_ledgers(&self, offset: u64, limit: u64) -> StorageResult<Vec<LedgerMetadata>> {
        self.primary.list_ledgers(offset, limit).await
    }

    async fn delete_ledger(&self, id: &str) -> StorageResult<bool> {
        let removed = self.primary.delete_ledger(id).await?;
        self.blobs.delete_ledger(id).await?;
        Ok(removed)
    }

    async fn put_entry(&self, ledger_id: &str, entry: &LedgerEntry) -> StorageResult<()> {
        let bytes = canonical_json_bytes(&entry.data)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        if (bytes.len() as u64) < self.size_threshold {
            self.primary.put_entry(ledger_id, entry).await?;
            let mut inline = self.inline.write().await;
            inline.count += 1;
            inline.total_bytes += bytes.len() as u64;
            return Ok(());
        }

        let meta = self
            .blobs
            .put(ledger_id, &entry.id, &bytes, BLOB_CONTENT_TYPE)
            .await?;

        let mut offloaded = entry.clone();
        offloaded.data = BlobRef::new(
            meta.content_hash,
            meta.size,
            ledger_id.to_string(),
            entry.id.clone(),
        )
        .to_value();

        if let Err(e) = self.primary.put_entry(ledger_id, &offloaded).await {
            // The row never landed; don't strand the blob.
            self.blobs.delete(ledger_id, &entry.id).await.ok();
            return Err(e);
        }
        Ok(())
    }

    async fn get_entry(
        &self,
        ledger_id: &str,
        entry_id: &str,
    ) -> StorageResult<Option<LedgerEntry>> {
        match self.primary.get_entry(ledger_id, entry_id).await? {
            Some(entry) => Ok(Some(self.rehydrate(ledger_id, entry).await?)),
            None => Ok(None),
        }
    }

    async fn get_entry_by_position(
        &self,
        ledger_id: &str,
        position: u64,
    ) -> StorageResult<Option<LedgerEntry>> {
        match self.primary.get_entry_by_position(ledger_id, position).await? {
            Some(entry) => Ok(Some(self.rehydrate(ledger_id, entry).await?)),
            None => Ok(None),
        }
    }

    async fn list_entries(
        &self,
        ledger_id: &str,
        offset: u64,
        limit: u64,
    ) -> StorageResult<Vec<LedgerEntry>> {
        let entries = self.primary.list_entries(ledger_id, offset, limit).await?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            out.push(self.rehydrate(ledger_id, entry).await?);
        }
        Ok(out)
    }

    async fn leaf_hashes(&self, ledger_id: &str) -> StorageResult<Vec<String>> {
        self.primary.leaf_hashes(ledger_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{entry_id_from_hash, hash_entry, HashAlgorithm, GENESIS_HASH};
    use crate::storage::{MemoryBlobStore, MemoryLedgerStore};
    use crate::types::BLOB_REF_TYPE;
    use chrono::Utc;
    use serde_json::json;

    fn entry_with(data: serde_json::Value, position: u64) -> LedgerEntry {
        let hash = hash_entry(HashAlgorithm::Sha256, &data, position).unwrap();
        LedgerEntry {
            id: entry_id_from_hash(&hash),
            position,
            data,
            hash,
            parent_hash: GENESIS_HASH.to_string(),
            created_at: Utc::now(),
            proof: None,
        }
    }

    async fn tiered(threshold: u64) -> (TieredStore, Arc<MemoryLedgerStore>, Arc<MemoryBlobStore>, LedgerMetadata) {
        let primary = Arc::new(MemoryLedgerStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = TieredStore::new(primary.clone(), blobs.clone(), threshold);
        let meta = LedgerMetadata::new("tiered", None, HashAlgorithm::Sha256);
        store.create_ledger(&meta).await.unwrap();
        (store, primary, blobs, meta)
    }

    #[tokio::test]
    async fn test_small_payload_stays_inline() {
        let (store, primary, blobs, meta) = tiered(100).await;
        let entry = entry_with(json!({"content": "small"}), 0);
        store.put_entry(&meta.id, &entry).await.unwrap();

        let raw = primary.get_entry(&meta.id, &entry.id).await.unwrap().unwrap();
        assert_eq!(raw.data, entry.data);
        assert_eq!(blobs.stats().await.unwrap().count, 0);

        let read = store.get_entry(&meta.id, &entry.id).await.unwrap().unwrap();
        assert_eq!(read.data, entry.data);
    }

    #[tokio::test]
    async fn test_large_payload_offloaded_and_rehydrated() {
        let (store, primary, blobs, meta) = tiered(100).await;
        let data = json!({"content": "x".repeat(200)});
        let entry = entry_with(data.clone(), 0);
        store.put_entry(&meta.id, &entry).await.unwrap();

        // The primary row carries the reference, not the payload.
        let raw = primary.get_entry(&meta.id, &entry.id).await.unwrap().unwrap();
        assert_eq!(raw.data["__type"], BLOB_REF_TYPE);
        assert_eq!(raw.hash, entry.hash);
        assert_eq!(blobs.stats().await.unwrap().count, 1);

        // Reads see the original payload on every path.
        let by_id = store.get_entry(&meta.id, &entry.id).await.unwrap().unwrap();
        assert_eq!(by_id.data, data);
        let by_pos = store.get_entry_by_position(&meta.id, 0).await.unwrap().unwrap();
        assert_eq!(by_pos.data, data);
        let listed = store.list_entries(&meta.id, 0, 10).await.unwrap();
        assert_eq!(listed[0].data, data);
    }

    #[tokio::test]
    async fn test_corrupted_blob_is_integrity_error() {
        let (store, _primary, blobs, meta) = tiered(100).await;
        let entry = entry_with(json!({"content": "x".repeat(200)}), 0);
        store.put_entry(&meta.id, &entry).await.unwrap();

        // Overwrite the blob with different bytes.
        blobs
            .put(&meta.id, &entry.id, br#"{"content":"corrupted"}"#, "application/json")
            .await
            .unwrap();

        assert!(matches!(
            store.get_entry(&meta.id, &entry.id).await,
            Err(StorageError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        // A payload exactly at the threshold is offloaded.
        let (store, primary, _blobs, meta) = tiered(24).await;
        let data = json!({"content": "0123456789"});
        assert_eq!(canonical_json_bytes(&data).unwrap().len(), 24);
        let entry = entry_with(data, 0);
        store.put_entry(&meta.id, &entry).await.unwrap();

        let raw = primary.get_entry(&meta.id, &entry.id).await.unwrap().unwrap();
        assert!(BlobRef::is_blob_ref(&raw.data));
    }

    #[tokio::test]
    async fn test_stats_per_tier() {
        let (store, _primary, _blobs, meta) = tiered(100).await;
        store
            .put_entry(&meta.id, &entry_with(json!({"s": 1}), 0))
            .await
            .unwrap();
        store
            .put_entry(&meta.id, &entry_with(json!({"big": "x".repeat(200)}), 1))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.inline_count, 1);
        assert_eq!(stats.blob_count, 1);
        assert!(stats.blob_bytes > 100);
    }

    #[tokio::test]
    async fn test_delete_ledger_removes_blobs() {
        let (store, _primary, blobs, meta) = tiered(100).await;
        store
            .put_entry(&meta.id, &entry_with(json!({"big": "x".repeat(200)}), 0))
            .await
            .unwrap();
        assert!(store.delete_ledger(&meta.id).await.unwrap());
        assert_eq!(blobs.stats().await.unwrap().count, 0);
    }
}
