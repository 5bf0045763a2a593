//! Root History Stores
//!
//! Durable record of published root snapshots, queryable by ledger and by
//! root hash so external parties can check a root they hold against the
//! service's history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{PublishedRoot, RootHistoryStore};
use crate::storage::StorageError;

/// In-memory root history (tests/dev)
#[derive(Clone, Default)]
pub struct MemoryRootHistoryStore {
    /// ledger_id -> snapshots, oldest first
    roots: Arc<RwLock<HashMap<String, Vec<PublishedRoot>>>>,
}

impl MemoryRootHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RootHistoryStore for MemoryRootHistoryStore {
    async fn append(&self, root: &PublishedRoot) -> Result<(), StorageError> {
        let mut roots = self.roots.write().await;
        roots
            .entry(root.ledger_id.clone())
            .or_default()
            .push(root.clone());
        Ok(())
    }

    async fn latest(&self, ledger_id: &str) -> Result<Option<PublishedRoot>, StorageError> {
        let roots = self.roots.read().await;
        Ok(roots.get(ledger_id).and_then(|v| v.last()).cloned())
    }

    async fn list(
        &self,
        ledger_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<PublishedRoot>, StorageError> {
        let roots = self.roots.read().await;
        let Some(history) = roots.get(ledger_id) else {
            return Ok(Vec::new());
        };
        Ok(history
            .iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_by_root_hash(
        &self,
        root_hash: &str,
    ) -> Result<Option<PublishedRoot>, StorageError> {
        let roots = self.roots.read().await;
        Ok(roots
            .values()
            .flatten()
            .find(|r| r.root_hash == root_hash)
            .cloned())
    }

    async fn set_anchor_ref(&self, id: &str, anchor_ref: &str) -> Result<(), StorageError> {
        let mut roots = self.roots.write().await;
        for history in roots.values_mut() {
            if let Some(root) = history.iter_mut().find(|r| r.id == id) {
                root.anchor_ref = Some(anchor_ref.to_string());
                return Ok(());
            }
        }
        Err(StorageError::NotFound(id.to_string()))
    }
}

/// SQLite-backed root history
pub struct SqliteRootHistoryStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteRootHistoryStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS published_roots (
                id TEXT PRIMARY KEY,
                ledger_id TEXT NOT NULL,
                root_hash TEXT NOT NULL,
                entry_count INTEGER NOT NULL,
                signature TEXT,
                published_at INTEGER NOT NULL,
                anchor_ref TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_published_roots_ledger
                ON published_roots(ledger_id, published_at);
            CREATE INDEX IF NOT EXISTS idx_published_roots_hash
                ON published_roots(root_hash);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_root(row: &rusqlite::Row) -> rusqlite::Result<PublishedRoot> {
        Ok(PublishedRoot {
            id: row.get("id")?,
            ledger_id: row.get("ledger_id")?,
            root_hash: row.get("root_hash")?,
            entry_count: row.get::<_, i64>("entry_count")? as u64,
            signature: row.get("signature")?,
            published_at: DateTime::<Utc>::from_timestamp_millis(row.get("published_at")?)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            anchor_ref: row.get("anchor_ref")?,
        })
    }
}

#[async_trait]
impl RootHistoryStore for SqliteRootHistoryStore {
    async fn append(&self, root: &PublishedRoot) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO published_roots (id, ledger_id, root_hash, entry_count,
                                         signature, published_at, anchor_ref)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                root.id,
                root.ledger_id,
                root.root_hash,
                root.entry_count as i64,
                root.signature,
                root.published_at.timestamp_millis(),
                root.anchor_ref,
            ],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    async fn latest(&self, ledger_id: &str) -> Result<Option<PublishedRoot>, StorageError> {
        let conn = self.conn()?;
        conn.query_row(
            r#"
            SELECT * FROM published_roots WHERE ledger_id = ?1
            ORDER BY published_at DESC, id DESC LIMIT 1
            "#,
            params![ledger_id],
            |row| Self::row_to_root(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn list(
        &self,
        ledger_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<PublishedRoot>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT * FROM published_roots WHERE ledger_id = ?1
                ORDER BY published_at DESC, id DESC LIMIT ?2 OFFSET ?3
                "#,
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![ledger_id, limit as i64, offset as i64], |row| {
                Self::row_to_root(row)
            })
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn find_by_root_hash(
        &self,
        root_hash: &str,
    ) -> Result<Option<PublishedRoot>, StorageError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM published_roots WHERE root_hash = ?1 LIMIT 1",
            params![root_hash],
            |row| Self::row_to_root(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn set_anchor_ref(&self, id: &str, anchor_ref: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE published_roots SET anchor_ref = ?2 WHERE id = ?1",
                params![id, anchor_ref],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        if updated == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_root(ledger_id: &str, count: u64, root_hash: &str) -> PublishedRoot {
        PublishedRoot {
            id: format!("root_{}", uuid::Uuid::new_v4().simple()),
            ledger_id: ledger_id.to_string(),
            root_hash: root_hash.to_string(),
            entry_count: count,
            signature: Some("ab".repeat(32)),
            published_at: Utc::now(),
            anchor_ref: None,
        }
    }

    #[tokio::test]
    async fn test_memory_history_ordering() {
        let store = MemoryRootHistoryStore::new();
        let r1 = sample_root("ledger_a", 1, &"11".repeat(32));
        let r2 = sample_root("ledger_a", 2, &"22".repeat(32));
        store.append(&r1).await.unwrap();
        store.append(&r2).await.unwrap();

        assert_eq!(store.latest("ledger_a").await.unwrap().unwrap().id, r2.id);
        let listed = store.list("ledger_a", 0, 10).await.unwrap();
        assert_eq!(listed[0].id, r2.id);
        assert_eq!(listed[1].id, r1.id);
        assert!(store.latest("ledger_b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_find_and_anchor() {
        let store = MemoryRootHistoryStore::new();
        let root = sample_root("ledger_a", 1, &"11".repeat(32));
        store.append(&root).await.unwrap();

        assert!(store.find_by_root_hash(&"11".repeat(32)).await.unwrap().is_some());
        assert!(store.find_by_root_hash(&"ff".repeat(32)).await.unwrap().is_none());

        store.set_anchor_ref(&root.id, "btc:txid").await.unwrap();
        let latest = store.latest("ledger_a").await.unwrap().unwrap();
        assert_eq!(latest.anchor_ref.as_deref(), Some("btc:txid"));

        assert!(matches!(
            store.set_anchor_ref("root_missing", "x").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let store = SqliteRootHistoryStore::in_memory().unwrap();
        let r1 = sample_root("ledger_a", 1, &"11".repeat(32));
        store.append(&r1).await.unwrap();

        let fetched = store.latest("ledger_a").await.unwrap().unwrap();
        assert_eq!(fetched.id, r1.id);
        assert_eq!(fetched.entry_count, 1);
        assert_eq!(fetched.signature, r1.signature);
        assert_eq!(
            fetched.published_at.timestamp_millis(),
            r1.published_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_sqlite_list_find_anchor() {
        let store = SqliteRootHistoryStore::in_memory().unwrap();
        let r1 = sample_root("ledger_a", 1, &"11".repeat(32));
        let r2 = sample_root("ledger_a", 5, &"22".repeat(32));
        store.append(&r1).await.unwrap();
        store.append(&r2).await.unwrap();

        let listed = store.list("ledger_a", 0, 10).await.unwrap();
        assert_eq!(listed.len(), 2);

        let found = store.find_by_root_hash(&"22".repeat(32)).await.unwrap().unwrap();
        assert_eq!(found.entry_count, 5);

        store.set_anchor_ref(&r1.id, "ots:ref").await.unwrap();
        let anchored = store.find_by_root_hash(&"11".repeat(32)).await.unwrap().unwrap();
        assert_eq!(anchored.anchor_ref.as_deref(), Some("ots:ref"));
    }
}
