//! SQLite Persistent Storage
//!
//! Durable ledger storage that survives service restarts. Uses connection
//! pooling via r2d2 for concurrent access. The schema enforces
//! `(ledger_id, position)` uniqueness, which backstops the per-ledger write
//! lock against concurrent appenders.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::traits::{LedgerStore, StorageError, StorageResult};
use crate::hash::HashAlgorithm;
use crate::types::{LedgerEntry, LedgerMetadata, LedgerMetadataPatch};

/// SQLite-backed ledger store with connection pooling
pub struct SqliteLedgerStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteLedgerStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
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
            CREATE TABLE IF NOT EXISTS ledgers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                algorithm TEXT NOT NULL DEFAULT 'sha256',
                root_hash TEXT NOT NULL,
                entry_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_entry_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS entries (
                ledger_id TEXT NOT NULL,
                entry_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                data TEXT NOT NULL,
                hash TEXT NOT NULL,
                parent_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                proof TEXT,
                PRIMARY KEY (ledger_id, entry_id),
                UNIQUE (ledger_id, position)
            );

            CREATE INDEX IF NOT EXISTS idx_entries_ledger_position
                ON entries(ledger_id, position);
            CREATE INDEX IF NOT EXISTS idx_ledgers_created_at
                ON ledgers(created_at);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_metadata(row: &rusqlite::Row) -> rusqlite::Result<LedgerMetadata> {
        let algorithm: String = row.get("algorithm")?;

        Ok(LedgerMetadata {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            algorithm: algorithm.parse().unwrap_or(HashAlgorithm::Sha256),
            root_hash: row.get("root_hash")?,
            entry_count: row.get::<_, i64>("entry_count")? as u64,
            created_at: millis_to_datetime(row.get("created_at")?),
            last_entry_at: row
                .get::<_, Option<i64>>("last_entry_at")?
                .map(millis_to_datetime),
        })
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<LedgerEntry> {
        let data: String = row.get("data")?;
        let proof: Option<String> = row.get("proof")?;

        Ok(LedgerEntry {
            id: row.get("entry_id")?,
            position: row.get::<_, i64>("position")? as u64,
            data: serde_json::from_str(&data).map_err(json_error)?,
            hash: row.get("hash")?,
            parent_hash: row.get("parent_hash")?,
            created_at: millis_to_datetime(row.get("created_at")?),
            proof: proof
                .map(|p| serde_json::from_str(&p).map_err(json_error))
                .transpose()?,
        })
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn json_error(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

/// SQLite duplicate-key extended result codes (PRIMARY KEY / UNIQUE).
fn is_duplicate_key(e: &rusqlite::Error) -> bool {
    if let rusqlite::Error::SqliteFailure(ref err, _) = e {
        err.extended_code == 1555 || err.extended_code == 2067
    } else {
        false
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn create_ledger(&self, meta: &LedgerMetadata) -> StorageResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO ledgers (id, name, description, algorithm, root_hash,
                                 entry_count, created_at, last_entry_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                meta.id,
                meta.name,
                meta.description,
                meta.algorithm.to_string(),
                meta.root_hash,
                meta.entry_count as i64,
                meta.created_at.timestamp_millis(),
                meta.last_entry_at.map(|t| t.timestamp_millis()),
            ],
        )
        .map_err(|e| {
            if is_duplicate_key(&e) {
                StorageError::Duplicate(meta.id.clone())
            } else {
                StorageError::Database(e.to_string())
            }
        })?;

        Ok(())
    }

    async fn update_ledger(&self, id: &str, patch: LedgerMetadataPatch) -> StorageResult<()> {
        let conn = self.conn()?;

        let mut meta = conn
            .query_row("SELECT * FROM ledgers WHERE id = ?1", params![id], |row| {
                Self::row_to_metadata(row)
            })
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        patch.apply(&mut meta);

        conn.execute(
            r#"
            UPDATE ledgers SET root_hash = ?2, entry_count = ?3, last_entry_at = ?4
            WHERE id = ?1
            "#,
            params![
                id,
                meta.root_hash,
                meta.entry_count as i64,
                meta.last_entry_at.map(|t| t.timestamp_millis()),
            ],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    async fn get_ledger(&self, id: &str) -> StorageResult<Option<LedgerMetadata>> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM ledgers WHERE id = ?1", params![id], |row| {
            Self::row_to_metadata(row)
        })
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn list_ledgers(&self, offset: u64, limit: u64) -> StorageResult<Vec<LedgerMetadata>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM ledgers ORDER BY created_at ASC, id ASC LIMIT ?1 OFFSET ?2",
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                Self::row_to_metadata(row)
            })
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn delete_ledger(&self, id: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM entries WHERE ledger_id = ?1", params![id])
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let removed = conn
            .execute("DELETE FROM ledgers WHERE id = ?1", params![id])
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn put_entry(&self, ledger_id: &str, entry: &LedgerEntry) -> StorageResult<()> {
        let conn = self.conn()?;

        let data = serde_json::to_string(&entry.data)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let proof = entry
            .proof
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO entries (ledger_id, entry_id, position, data, hash,
                                 parent_hash, created_at, proof)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                ledger_id,
                entry.id,
                entry.position as i64,
                data,
                entry.hash,
                entry.parent_hash,
                entry.created_at.timestamp_millis(),
                proof,
            ],
        )
        .map_err(|e| {
            if is_duplicate_key(&e) {
                StorageError::Conflict(format!(
                    "position {} already occupied in {}",
                    entry.position, ledger_id
                ))
            } else {
                StorageError::Database(e.to_string())
            }
        })?;

        Ok(())
    }

    async fn get_entry(
        &self,
        ledger_id: &str,
        entry_id: &str,
    ) -> StorageResult<Option<LedgerEntry>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM entries WHERE ledger_id = ?1 AND entry_id = ?2",
            params![ledger_id, entry_id],
            |row| Self::row_to_entry(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn get_entry_by_position(
        &self,
        ledger_id: &str,
        position: u64,
    ) -> StorageResult<Option<LedgerEntry>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM entries WHERE ledger_id = ?1 AND position = ?2",
            params![ledger_id, position as i64],
            |row| Self::row_to_entry(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn list_entries(
        &self,
        ledger_id: &str,
        offset: u64,
        limit: u64,
    ) -> StorageResult<Vec<LedgerEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT * FROM entries WHERE ledger_id = ?1
                ORDER BY position ASC LIMIT ?2 OFFSET ?3
                "#,
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![ledger_id, limit as i64, offset as i64], |row| {
                Self::row_to_entry(row)
            })
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn leaf_hashes(&self, ledger_id: &str) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT hash FROM entries WHERE ledger_id = ?1 ORDER BY position ASC")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![ledger_id], |row| row.get::<_, String>(0))
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))
    }
}
