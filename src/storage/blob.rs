//! Blob Storage
//!
//! Content-addressed payload storage for the tiered decorator. Blobs are
//! keyed by `(ledger_id, entry_id)` and immutable once written until their
//! ledger is deleted; metadata records the content hash checked on read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{StorageError, StorageResult};
use crate::hash::sha256_hex;

/// Part size for multipart writes.
const MULTIPART_CHUNK_BYTES: usize = 1024 * 1024;

/// Metadata recorded alongside each blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// SHA-256 of the blob bytes, hex.
    pub content_hash: String,
    pub size: u64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

/// Per-tier statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlobStats {
    pub count: u64,
    pub total_bytes: u64,
}

/// Out-of-band payload storage interface
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a blob; returns metadata with the computed content hash.
    async fn put(
        &self,
        ledger_id: &str,
        entry_id: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> StorageResult<BlobMetadata>;

    /// Read a blob and its metadata.
    async fn get(&self, ledger_id: &str, entry_id: &str) -> StorageResult<(Vec<u8>, BlobMetadata)>;

    /// Delete one blob. Returns false if absent.
    async fn delete(&self, ledger_id: &str, entry_id: &str) -> StorageResult<bool>;

    /// Delete every blob belonging to a ledger; returns the count removed.
    async fn delete_ledger(&self, ledger_id: &str) -> StorageResult<u64>;

    /// Count and total bytes currently stored.
    async fn stats(&self) -> StorageResult<BlobStats>;
}

fn blob_metadata(bytes: &[u8], content_type: &str) -> BlobMetadata {
    BlobMetadata {
        content_hash: sha256_hex(bytes),
        size: bytes.len() as u64,
        content_type: content_type.to_string(),
        created_at: Utc::now(),
    }
}

/// In-memory blob store (tests/dev)
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<(String, String), (Vec<u8>, BlobMetadata)>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        ledger_id: &str,
        entry_id: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> StorageResult<BlobMetadata> {
        let meta = blob_metadata(bytes, content_type);
        let mut blobs = self.blobs.write().await;
        blobs.insert(
            (ledger_id.to_string(), entry_id.to_string()),
            (bytes.to_vec(), meta.clone()),
        );
        Ok(meta)
    }

    async fn get(&self, ledger_id: &str, entry_id: &str) -> StorageResult<(Vec<u8>, BlobMetadata)> {
        let blobs = self.blobs.read().await;
        blobs
            .get(&(ledger_id.to_string(), entry_id.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("blob {}/{}", ledger_id, entry_id)))
    }

    async fn delete(&self, ledger_id: &str, entry_id: &str) -> StorageResult<bool> {
        let mut blobs = self.blobs.write().await;
        Ok(blobs
            .remove(&(ledger_id.to_string(), entry_id.to_string()))
            .is_some())
    }

    async fn delete_ledger(&self, ledger_id: &str) -> StorageResult<u64> {
        let mut blobs = self.blobs.write().await;
        let before = blobs.len();
        blobs.retain(|(lid, _), _| lid != ledger_id);
        Ok((before - blobs.len()) as u64)
    }

    async fn stats(&self) -> StorageResult<BlobStats> {
        let blobs = self.blobs.read().await;
        Ok(BlobStats {
            count: blobs.len() as u64,
            total_bytes: blobs.values().map(|(b, _)| b.len() as u64).sum(),
        })
    }
}

/// Filesystem blob store
///
/// One payload file plus a metadata sidecar per blob, laid out as
/// `<root>/<ledger_id>/<entry_id>.bin` and `.meta.json`. Writes above the
/// multipart threshold stream in fixed-size parts to a temp file that is
/// renamed into place, so a crashed upload never leaves a readable blob.
pub struct FsBlobStore {
    root: PathBuf,
    multipart_threshold: u64,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root: P, multipart_threshold: u64) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root.as_ref())
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            multipart_threshold,
        })
    }

    fn blob_path(&self, ledger_id: &str, entry_id: &str) -> PathBuf {
        self.root.join(ledger_id).join(format!("{}.bin", entry_id))
    }

    fn meta_path(&self, ledger_id: &str, entry_id: &str) -> PathBuf {
        self.root
            .join(ledger_id)
            .join(format!("{}.meta.json", entry_id))
    }

    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let io_err = |e: std::io::Error| StorageError::Database(e.to_string());

        if bytes.len() as u64 >= self.multipart_threshold {
            let tmp = path.with_extension("part");
            let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
            for chunk in bytes.chunks(MULTIPART_CHUNK_BYTES) {
                file.write_all(chunk).map_err(io_err)?;
            }
            file.sync_all().map_err(io_err)?;
            std::fs::rename(&tmp, path).map_err(io_err)?;
        } else {
            std::fs::write(path, bytes).map_err(io_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        ledger_id: &str,
        entry_id: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> StorageResult<BlobMetadata> {
        let meta = blob_metadata(bytes, content_type);
        let dir = self.root.join(ledger_id);
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::Database(e.to_string()))?;

        self.write_bytes(&self.blob_path(ledger_id, entry_id), bytes)?;
        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        std::fs::write(self.meta_path(ledger_id, entry_id), meta_json)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(meta)
    }

    async fn get(&self, ledger_id: &str, entry_id: &str) -> StorageResult<(Vec<u8>, BlobMetadata)> {
        let not_found = || StorageError::NotFound(format!("blob {}/{}", ledger_id, entry_id));

        let bytes = std::fs::read(self.blob_path(ledger_id, entry_id)).map_err(|_| not_found())?;
        let meta_json =
            std::fs::read(self.meta_path(ledger_id, entry_id)).map_err(|_| not_found())?;
        let meta: BlobMetadata = serde_json::from_slice(&meta_json)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        Ok((bytes, meta))
    }

    async fn delete(&self, ledger_id: &str, entry_id: &str) -> StorageResult<bool> {
        let existed = std::fs::remove_file(self.blob_path(ledger_id, entry_id)).is_ok();
        std::fs::remove_file(self.meta_path(ledger_id, entry_id)).ok();
        Ok(existed)
    }

    async fn delete_ledger(&self, ledger_id: &str) -> StorageResult<u64> {
        let dir = self.root.join(ledger_id);
        let Ok(listing) = std::fs::read_dir(&dir) else {
            return Ok(0);
        };
        let count = listing
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "bin").unwrap_or(false))
            .count() as u64;
        std::fs::remove_dir_all(&dir).map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(count)
    }

    async fn stats(&self) -> StorageResult<BlobStats> {
        let mut stats = BlobStats::default();
        let Ok(ledgers) = std::fs::read_dir(&self.root) else {
            return Ok(stats);
        };
        for ledger in ledgers.filter_map(|e| e.ok()) {
            let Ok(files) = std::fs::read_dir(ledger.path()) else {
                continue;
            };
            for file in files.filter_map(|e| e.ok()) {
                if file.path().extension().map(|x| x == "bin").unwrap_or(false) {
                    stats.count += 1;
                    if let Ok(meta) = file.metadata() {
                        stats.total_bytes += meta.len();
                    }
                }
            }
        }
        Ok(stats)
    }
}
