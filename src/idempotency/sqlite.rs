//! SQLite Idempotency Store
//!
//! Durable record cache with `(ledger_id, key)` as the primary key. The
//! insert uses `ON CONFLICT DO NOTHING`: whichever of two concurrent appends
//! lands first owns the record, which is the uniqueness backstop from the
//! concurrency model.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::IdempotencyStore;
use crate::storage::{StorageError, StorageResult};
use crate::types::AppendResult;

/// SQLite-backed idempotency store with connection pooling
pub struct SqliteIdempotencyStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteIdempotencyStore {
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
            CREATE TABLE IF NOT EXISTS idempotency_records (
                ledger_id TEXT NOT NULL,
                key TEXT NOT NULL,
                result TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (ledger_id, key)
            );

            CREATE INDEX IF NOT EXISTS idx_idempotency_expires_at
                ON idempotency_records(expires_at);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for SqliteIdempotencyStore {
    async fn get(&self, ledger_id: &str, key: &str) -> StorageResult<Option<AppendResult>> {
        let conn = self.conn()?;
        let row: Option<String> = conn
            .query_row(
                r#"
                SELECT result FROM idempotency_records
                WHERE ledger_id = ?1 AND key = ?2 AND expires_at > ?3
                "#,
                params![ledger_id, key, Utc::now().timestamp_millis()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        row.map(|json| {
            serde_json::from_str(&json).map_err(|e| StorageError::InvalidData(e.to_string()))
        })
        .transpose()
    }

    async fn set(
        &self,
        ledger_id: &str,
        key: &str,
        result: &AppendResult,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let json = serde_json::to_string(result)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO idempotency_records (ledger_id, key, result, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(ledger_id, key) DO NOTHING
            "#,
            params![ledger_id, key, json, expires_at.timestamp_millis()],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, ledger_id: &str, key: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM idempotency_records WHERE ledger_id = ?1 AND key = ?2",
                params![ledger_id, key],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn cleanup(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM idempotency_records WHERE expires_at <= ?1",
                params![Utc::now().timestamp_millis()],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(removed as u64)
    }
}
