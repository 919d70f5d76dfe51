//! In-memory implementation of the store traits.
//!
//! Same semantics as SQLite, with no persistence. Used by tests and by
//! replicas that rebuild from the network on every start.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use docmesh_core::{Entry, EntryHash, LogicalClock};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::traits::{DocumentStore, EntryStore, InsertResult};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Entries indexed by hash.
    entries: HashMap<EntryHash, StoredEntry>,

    /// Log membership, ordered the way `list_entries` returns it.
    logs: HashMap<EntryHash, BTreeSet<(LogicalClock, EntryHash)>>,

    /// Documents by key.
    documents: BTreeMap<String, Value>,
}

struct StoredEntry {
    entry: Entry,
    canonical: Vec<u8>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn insert_entry(
        &self,
        log: &EntryHash,
        entry: &Entry,
        canonical: &[u8],
    ) -> Result<InsertResult> {
        let mut inner = self.write()?;

        inner.entries.entry(entry.hash).or_insert_with(|| StoredEntry {
            entry: entry.clone(),
            canonical: canonical.to_vec(),
        });

        let inserted = inner
            .logs
            .entry(*log)
            .or_default()
            .insert(entry.order_key());

        Ok(if inserted {
            InsertResult::Inserted
        } else {
            InsertResult::AlreadyExists
        })
    }

    async fn get_entry(&self, hash: &EntryHash) -> Result<Option<Entry>> {
        Ok(self.read()?.entries.get(hash).map(|s| s.entry.clone()))
    }

    async fn get_canonical_bytes(&self, hash: &EntryHash) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.entries.get(hash).map(|s| s.canonical.clone()))
    }

    async fn has_entry(&self, log: &EntryHash, hash: &EntryHash) -> Result<bool> {
        let inner = self.read()?;
        let Some(stored) = inner.entries.get(hash) else {
            return Ok(false);
        };
        Ok(inner
            .logs
            .get(log)
            .is_some_and(|members| members.contains(&stored.entry.order_key())))
    }

    async fn list_entries(&self, log: &EntryHash) -> Result<Vec<Entry>> {
        let inner = self.read()?;
        let Some(members) = inner.logs.get(log) else {
            return Ok(Vec::new());
        };
        Ok(members
            .iter()
            .filter_map(|(_, hash)| inner.entries.get(hash).map(|s| s.entry.clone()))
            .collect())
    }

    async fn count_entries(&self, log: &EntryHash) -> Result<u64> {
        Ok(self
            .read()?
            .logs
            .get(log)
            .map_or(0, |members| members.len() as u64))
    }

    async fn list_logs(&self) -> Result<Vec<EntryHash>> {
        let mut logs: Vec<EntryHash> = self.read()?.logs.keys().copied().collect();
        logs.sort();
        Ok(logs)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read()?.documents.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        self.write()?
            .documents
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.write()?.documents.remove(key).is_some())
    }

    async fn all_entries(&self) -> Result<Vec<(String, Value)>> {
        Ok(self
            .read()?
            .documents
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.read()?.documents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{DocumentStoreExt, EntryStoreExt};
    use docmesh_core::{canonical_bytes, Change, EntryBuilder, Keypair, Operation};
    use proptest::prelude::*;
    use serde_json::json;

    fn genesis(keypair: &Keypair) -> Entry {
        EntryBuilder::new(Operation::genesis("test", [keypair.public_key()]))
            .sign(keypair)
            .unwrap()
    }

    fn put(keypair: &Keypair, parent: &Entry, key: &str) -> Entry {
        EntryBuilder::new(Operation::put(key, json!({ "key": key })))
            .clock(parent.clock().tick())
            .predecessors([parent.hash])
            .sign(keypair)
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_entry() {
        let store = MemoryStore::new();
        let keypair = Keypair::generate();
        let g = genesis(&keypair);
        let canonical = canonical_bytes(&g);

        let result = store.insert_entry(&g.hash, &g, &canonical).await.unwrap();
        assert_eq!(result, InsertResult::Inserted);

        assert_eq!(store.get_entry(&g.hash).await.unwrap(), Some(g.clone()));
        assert_eq!(
            store.get_canonical_bytes(&g.hash).await.unwrap(),
            Some(canonical)
        );
        assert!(store.has_entry(&g.hash, &g.hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_idempotent_insert() {
        let store = MemoryStore::new();
        let g = genesis(&Keypair::generate());
        let canonical = canonical_bytes(&g);

        store.insert_entry(&g.hash, &g, &canonical).await.unwrap();
        let again = store.insert_entry(&g.hash, &g, &canonical).await.unwrap();
        assert_eq!(again, InsertResult::AlreadyExists);
        assert_eq!(store.count_entries(&g.hash).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_entries_shared_between_logs() {
        let store = MemoryStore::new();
        let keypair = Keypair::generate();
        let g = genesis(&keypair);
        let other_log = EntryHash([0xee; 32]);

        store.insert_batch(&g.hash, &[g.clone()]).await.unwrap();
        assert!(!store.has_entry(&other_log, &g.hash).await.unwrap());

        store.insert_batch(&other_log, &[g.clone()]).await.unwrap();
        assert!(store.has_entry(&other_log, &g.hash).await.unwrap());
        assert_eq!(store.list_logs().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_entries_in_clock_order() {
        let store = MemoryStore::new();
        let keypair = Keypair::generate();
        let g = genesis(&keypair);
        let a = put(&keypair, &g, "a");
        let b = put(&keypair, &a, "b");

        let inserted = store
            .insert_batch(&g.hash, &[b.clone(), g.clone(), a.clone()])
            .await
            .unwrap();
        assert_eq!(inserted, 3);

        let listed: Vec<_> = store
            .list_entries(&g.hash)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.hash)
            .collect();
        assert_eq!(listed, vec![g.hash, a.hash, b.hash]);
    }

    #[tokio::test]
    async fn test_documents() {
        let store = MemoryStore::new();
        store.put("b", &json!(2)).await.unwrap();
        store.put("a", &json!(1)).await.unwrap();
        store.put("a", &json!(3)).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(json!(3)));
        assert_eq!(
            store.all_entries().await.unwrap(),
            vec![("a".to_string(), json!(3)), ("b".to_string(), json!(2))]
        );
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(DocumentStore::len(&store).await.unwrap(), 1);
    }

    proptest! {
        #[test]
        fn prop_apply_changes_matches_model(
            ops in proptest::collection::vec((0u8..4, proptest::option::of(0i64..100)), 0..40)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let store = MemoryStore::new();
            let mut model = BTreeMap::new();

            let changes: Vec<Change> = ops
                .iter()
                .map(|(k, v)| {
                    let key = format!("k{k}");
                    match v {
                        Some(n) => {
                            model.insert(key.clone(), json!(n));
                            Change::Put { key, value: json!(n) }
                        }
                        None => {
                            model.remove(&key);
                            Change::Delete { key }
                        }
                    }
                })
                .collect();

            rt.block_on(store.apply_changes(&changes)).unwrap();
            let stored: BTreeMap<String, Value> =
                rt.block_on(store.all_entries()).unwrap().into_iter().collect();
            prop_assert_eq!(stored, model);
        }
    }
}
