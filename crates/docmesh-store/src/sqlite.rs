//! SQLite implementation of the store traits.
//!
//! This is the persistent backend for docmesh. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use docmesh_core::{decode_entry, Entry, EntryHash};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{DocumentStore, EntryStore, InsertResult};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn hash_from_blob(bytes: Vec<u8>) -> Result<EntryHash> {
    EntryHash::try_from(bytes.as_slice())
        .map_err(|_| StoreError::InvalidData(format!("hash column has {} bytes", bytes.len())))
}

fn entry_from_blob(bytes: &[u8]) -> Result<Entry> {
    decode_entry(bytes).map_err(|e| StoreError::InvalidData(e.to_string()))
}

#[async_trait]
impl EntryStore for SqliteStore {
    async fn insert_entry(
        &self,
        log: &EntryHash,
        entry: &Entry,
        canonical: &[u8],
    ) -> Result<InsertResult> {
        let log = *log;
        let hash = entry.hash;
        let author = *entry.author();
        let clock = i64::try_from(entry.clock().value())
            .map_err(|_| StoreError::InvalidData(format!("clock {} out of range", entry.clock())))?;
        let kind = entry.kind().to_u16() as i64;
        let canonical = canonical.to_vec();

        let result = self
            .blocking(move |conn| {
                let tx = conn.transaction()?;

                tx.execute(
                    "INSERT OR IGNORE INTO entries (
                        hash, author, clock, kind, canonical_bytes, ingested_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        hash.0.as_slice(),
                        author.0.as_slice(),
                        clock,
                        kind,
                        canonical.as_slice(),
                        now_millis(),
                    ],
                )?;

                let linked = tx.execute(
                    "INSERT OR IGNORE INTO log_entries (log_root, hash) VALUES (?1, ?2)",
                    params![log.0.as_slice(), hash.0.as_slice()],
                )?;

                tx.commit()?;

                Ok(if linked == 1 {
                    InsertResult::Inserted
                } else {
                    InsertResult::AlreadyExists
                })
            })
            .await?;

        debug!(log = %log, entry = %hash, ?result, "stored entry");
        Ok(result)
    }

    async fn get_entry(&self, hash: &EntryHash) -> Result<Option<Entry>> {
        match self.get_canonical_bytes(hash).await? {
            Some(bytes) => entry_from_blob(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn get_canonical_bytes(&self, hash: &EntryHash) -> Result<Option<Vec<u8>>> {
        let hash = *hash;
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT canonical_bytes FROM entries WHERE hash = ?1",
                params![hash.0.as_slice()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn has_entry(&self, log: &EntryHash, hash: &EntryHash) -> Result<bool> {
        let (log, hash) = (*log, *hash);
        self.blocking(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM log_entries WHERE log_root = ?1 AND hash = ?2",
                    params![log.0.as_slice(), hash.0.as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn list_entries(&self, log: &EntryHash) -> Result<Vec<Entry>> {
        let log = *log;
        let blobs: Vec<Vec<u8>> = self
            .blocking(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT e.canonical_bytes
                     FROM log_entries l JOIN entries e ON e.hash = l.hash
                     WHERE l.log_root = ?1
                     ORDER BY e.clock ASC, e.hash ASC",
                )?;
                let rows = stmt
                    .query_map(params![log.0.as_slice()], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
                Ok(rows)
            })
            .await?;

        blobs.iter().map(|b| entry_from_blob(b)).collect()
    }

    async fn count_entries(&self, log: &EntryHash) -> Result<u64> {
        let log = *log;
        self.blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM log_entries WHERE log_root = ?1",
                params![log.0.as_slice()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn list_logs(&self) -> Result<Vec<EntryHash>> {
        let blobs: Vec<Vec<u8>> = self
            .blocking(|conn| {
                let mut stmt =
                    conn.prepare("SELECT DISTINCT log_root FROM log_entries ORDER BY log_root")?;
                let rows = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
                Ok(rows)
            })
            .await?;

        blobs.into_iter().map(hash_from_blob).collect()
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        let text: Option<String> = self
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT value FROM documents WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await?;

        text.map(|t| serde_json::from_str(&t).map_err(StoreError::from))
            .transpose()
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        let key = key.to_string();
        let text = serde_json::to_string(value)?;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO documents (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, text, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.blocking(move |conn| {
            let removed = conn.execute("DELETE FROM documents WHERE key = ?1", params![key])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn all_entries(&self) -> Result<Vec<(String, Value)>> {
        let rows: Vec<(String, String)> = self
            .blocking(|conn| {
                let mut stmt = conn.prepare("SELECT key, value FROM documents ORDER BY key")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(k, v)| -> Result<(String, Value)> { Ok((k, serde_json::from_str(&v)?)) })
            .collect()
    }

    async fn len(&self) -> Result<usize> {
        self.blocking(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}
