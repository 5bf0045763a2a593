//! In-Memory Idempotency Store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::IdempotencyStore;
use crate::storage::StorageResult;
use crate::types::AppendResult;

#[derive(Debug, Clone)]
struct Record {
    result: AppendResult,
    expires_at: DateTime<Utc>,
}

/// In-memory idempotency store, keyed by `(ledger_id, key)`.
#[derive(Clone, Default)]
pub struct MemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<(String, String), Record>>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn get(&self, ledger_id: &str, key: &str) -> StorageResult<Option<AppendResult>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(ledger_id.to_string(), key.to_string()))
            .filter(|r| r.expires_at > Utc::now())
            .map(|r| r.result.clone()))
    }

    async fn set(
        &self,
        ledger_id: &str,
        key: &str,
        result: &AppendResult,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut records = self.records.write().await;
        records
            .entry((ledger_id.to_string(), key.to_string()))
            .or_insert_with(|| Record {
                result: result.clone(),
                expires_at,
            });
        Ok(())
    }

    async fn delete(&self, ledger_id: &str, key: &str) -> StorageResult<bool> {
        let mut records = self.records.write().await;
        Ok(records
            .remove(&(ledger_id.to_string(), key.to_string()))
            .is_some())
    }

    async fn cleanup(&self) -> StorageResult<u64> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.expires_at > now);
        Ok((before - records.len()) as u64)
    }
}
