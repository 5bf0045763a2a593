//! In-Memory Storage Implementation
//!
//! Thread-safe storage for ledgers and entries, used in tests and
//! development. Data is lost when the service restarts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{LedgerStore, StorageError, StorageResult};
use crate::types::{LedgerEntry, LedgerMetadata, LedgerMetadataPatch};

#[derive(Debug)]
struct LedgerSlot {
    meta: LedgerMetadata,
    /// Entries indexed by position; the Vec index IS the position.
    entries: Vec<LedgerEntry>,
    /// Index: entry id -> position
    by_id: HashMap<String, u64>,
}

/// In-memory ledger store
///
/// Uses `Arc<RwLock<..>>` for concurrent access; cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    ledgers: Arc<RwLock<HashMap<String, LedgerSlot>>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn create_ledger(&self, meta: &LedgerMetadata) -> StorageResult<()> {
        let mut ledgers = self.ledgers.write().await;
        if ledgers.contains_key(&meta.id) {
            return Err(StorageError::Duplicate(meta.id.clone()));
        }
        ledgers.insert(
            meta.id.clone(),
            LedgerSlot {
                meta: meta.clone(),
                entries: Vec::new(),
                by_id: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn update_ledger(&self, id: &str, patch: LedgerMetadataPatch) -> StorageResult<()> {
        let mut ledgers = self.ledgers.write().await;
        let slot = ledgers
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        patch.apply(&mut slot.meta);
        Ok(())
    }

    async fn get_ledger(&self, id: &str) -> StorageResult<Option<LedgerMetadata>> {
        let ledgers = self.ledgers.read().await;
        Ok(ledgers.get(id).map(|slot| slot.meta.clone()))
    }

    async fn list_ledgers(&self, offset: u64, limit: u64) -> StorageResult<Vec<LedgerMetadata>> {
        let ledgers = self.ledgers.read().await;
        let mut metas: Vec<LedgerMetadata> =
            ledgers.values().map(|slot| slot.meta.clone()).collect();
        metas.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(metas
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn delete_ledger(&self, id: &str) -> StorageResult<bool> {
        let mut ledgers = self.ledgers.write().await;
        Ok(ledgers.remove(id).is_some())
    }

    async fn put_entry(&self, ledger_id: &str, entry: &LedgerEntry) -> StorageResult<()> {
        let mut ledgers = self.ledgers.write().await;
        let slot = ledgers
            .get_mut(ledger_id)
            .ok_or_else(|| StorageError::NotFound(ledger_id.to_string()))?;

        let next = slot.entries.len() as u64;
        if entry.position < next {
            return Err(StorageError::Conflict(format!(
                "position {} already occupied in {}",
                entry.position, ledger_id
            )));
        }
        if entry.position > next {
            return Err(StorageError::InvalidData(format!(
                "non-contiguous position {} (expected {})",
                entry.position, next
            )));
        }

        slot.by_id.insert(entry.id.clone(), entry.position);
        slot.entries.push(entry.clone());
        Ok(())
    }

    async fn get_entry(
        &self,
        ledger_id: &str,
        entry_id: &str,
    ) -> StorageResult<Option<LedgerEntry>> {
        let ledgers = self.ledgers.read().await;
        let Some(slot) = ledgers.get(ledger_id) else {
            return Ok(None);
        };
        Ok(slot
            .by_id
            .get(entry_id)
            .and_then(|&pos| slot.entries.get(pos as usize))
            .cloned())
    }

    async fn get_entry_by_position(
        &self,
        ledger_id: &str,
        position: u64,
    ) -> StorageResult<Option<LedgerEntry>> {
        let ledgers = self.ledgers.read().await;
        Ok(ledgers
            .get(ledger_id)
            .and_then(|slot| slot.entries.get(position as usize))
            .cloned())
    }

    async fn list_entries(
        &self,
        ledger_id: &str,
        offset: u64,
        limit: u64,
    ) -> StorageResult<Vec<LedgerEntry>> {
        let ledgers = self.ledgers.read().await;
        let Some(slot) = ledgers.get(ledger_id) else {
            return Ok(Vec::new());
        };
        Ok(slot
            .entries
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn leaf_hashes(&self, ledger_id: &str) -> StorageResult<Vec<String>> {
        let ledgers = self.ledgers.read().await;
        let Some(slot) = ledgers.get(ledger_id) else {
            return Ok(Vec::new());
        };
        Ok(slot.entries.iter().map(|e| e.hash.clone()).collect())
    }
}
