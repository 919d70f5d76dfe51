//! Store traits: the abstract interfaces for entry and document persistence.
//!
//! These traits keep the engine storage-agnostic. Implementations include
//! SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use docmesh_core::{canonical_bytes, Change, Entry, EntryHash};
use serde_json::Value;

use crate::error::Result;

/// Result of inserting an entry into a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Entry was linked into the log.
    Inserted,
    /// Entry was already part of the log (idempotent, not an error).
    AlreadyExists,
}

/// Async interface for entry persistence.
///
/// Entries are content-addressed and stored once; a log (identified by the
/// hash of its genesis entry) is a set of links to them. For SQLite, work
/// runs under `spawn_blocking` to avoid blocking the runtime.
#[async_trait]
pub trait EntryStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Entry Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert an entry into a log.
    ///
    /// # Arguments
    /// - `log`: Root hash of the log the entry belongs to.
    /// - `entry`: The entry, already validated by the caller.
    /// - `canonical`: The canonical bytes (cached to avoid recomputation).
    async fn insert_entry(
        &self,
        log: &EntryHash,
        entry: &Entry,
        canonical: &[u8],
    ) -> Result<InsertResult>;

    /// Get an entry by its content hash, from any log.
    async fn get_entry(&self, hash: &EntryHash) -> Result<Option<Entry>>;

    /// Get the stored canonical bytes of an entry.
    async fn get_canonical_bytes(&self, hash: &EntryHash) -> Result<Option<Vec<u8>>>;

    /// Check whether an entry is linked into a log.
    async fn has_entry(&self, log: &EntryHash, hash: &EntryHash) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Log Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// All entries of a log, ordered by `(clock, hash)`.
    async fn list_entries(&self, log: &EntryHash) -> Result<Vec<Entry>>;

    /// Number of entries in a log.
    async fn count_entries(&self, log: &EntryHash) -> Result<u64>;

    /// Root hashes of every log with at least one entry.
    async fn list_logs(&self) -> Result<Vec<EntryHash>>;
}

/// Async interface for the key → document store.
///
/// Writes overwrite atomically per key. `all_entries` returns documents in
/// key order.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn put(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove a document. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn all_entries(&self) -> Result<Vec<(String, Value)>>;

    async fn len(&self) -> Result<usize>;
}

/// Extension trait for batched entry inserts.
pub trait EntryStoreExt: EntryStore {
    /// Insert entries in order. Returns how many were newly linked.
    fn insert_batch(
        &self,
        log: &EntryHash,
        entries: &[Entry],
    ) -> impl std::future::Future<Output = Result<usize>> + Send;
}

impl<S: EntryStore + ?Sized> EntryStoreExt for S {
    async fn insert_batch(&self, log: &EntryHash, entries: &[Entry]) -> Result<usize> {
        let mut inserted = 0;
        for entry in entries {
            let canonical = canonical_bytes(entry);
            if self.insert_entry(log, entry, &canonical).await? == InsertResult::Inserted {
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

/// Extension trait for writing materializer output through to a document store.
pub trait DocumentStoreExt: DocumentStore {
    /// Apply changes in order.
    fn apply_changes(
        &self,
        changes: &[Change],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl<D: DocumentStore + ?Sized> DocumentStoreExt for D {
    async fn apply_changes(&self, changes: &[Change]) -> Result<()> {
        for change in changes {
            match change {
                Change::Put { key, value } => self.put(key, value).await?,
                Change::Delete { key } => {
                    self.delete(key).await?;
                }
            }
        }
        Ok(())
    }
}
