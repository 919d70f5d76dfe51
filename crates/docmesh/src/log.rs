//! The entry log of one attached log root.
//!
//! Holds the hash-keyed arena, the frontier and the access controller, and
//! writes every accepted entry through to the entry store before it becomes
//! visible in memory.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use docmesh_core::{
    causal_sort, validate_causal_links, validate_entry, Entry, EntryArena, EntryBuilder,
    EntryHash, Frontier, Identity, LogAddress, LogicalClock, Operation, OperationKind,
    PublicKeyId, ValidationError,
};
use docmesh_perms::AccessController;
use docmesh_store::{EntryStore, EntryStoreExt};

use crate::error::{EngineError, Result};

/// Entries a merge would add, computed without touching the log.
#[derive(Debug, Clone)]
pub struct MergePlan {
    /// Entries that passed validation, in causal order.
    pub accepted: Vec<Entry>,
    /// Candidates already in the log or repeated in the input.
    pub duplicates: usize,
    /// Candidates rejected by validation or authorization.
    pub dropped: usize,
    access: AccessController,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

/// A causally closed, validated set of entries for one log root.
pub struct EntryLog {
    address: LogAddress,
    store: Arc<dyn EntryStore>,
    arena: EntryArena,
    frontier: Frontier,
    access: AccessController,
}

impl EntryLog {
    /// Start a new log: sign a genesis entry, store it and derive the address.
    pub async fn create(
        store: Arc<dyn EntryStore>,
        identity: &dyn Identity,
        name: &str,
        writers: impl IntoIterator<Item = PublicKeyId>,
    ) -> Result<(Self, Entry)> {
        let genesis = EntryBuilder::new(Operation::genesis(name, writers)).sign(identity)?;
        validate_entry(&genesis).map_err(signature_error)?;

        let address = LogAddress::derive(&genesis, name)?;
        let mut log = Self::empty(store, address);

        if !log.access.check(&genesis, &log.arena) {
            return Err(EngineError::Unauthorized {
                author: identity.public_key(),
            });
        }
        log.store_and_insert(vec![genesis.clone()]).await?;

        debug!(address = %log.address, "created log");
        Ok((log, genesis))
    }

    /// An empty log for `address`. Entries arrive through
    /// [`plan_merge`](Self::plan_merge) and [`integrate`](Self::integrate).
    pub fn empty(store: Arc<dyn EntryStore>, address: LogAddress) -> Self {
        Self {
            address,
            store,
            arena: EntryArena::new(),
            frontier: Frontier::new(),
            access: AccessController::new(),
        }
    }

    pub fn address(&self) -> &LogAddress {
        &self.address
    }

    pub fn root(&self) -> EntryHash {
        self.address.root()
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn contains(&self, hash: &EntryHash) -> bool {
        self.arena.contains(hash)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Append
    // ─────────────────────────────────────────────────────────────────────────

    /// Sign `operation` on top of the current frontier and add it to the log.
    pub async fn append(&mut self, operation: Operation, identity: &dyn Identity) -> Result<Entry> {
        let entry = self.prepare_append(operation, identity)?;
        self.commit(entry.clone()).await?;
        Ok(entry)
    }

    /// Sign and check an entry for the current frontier without adding it.
    ///
    /// Only the access controller's verdict cache is touched.
    pub fn prepare_append(&mut self, operation: Operation, identity: &dyn Identity) -> Result<Entry> {
        if operation.kind() == OperationKind::Genesis {
            return Err(EngineError::InvalidOperation(
                "genesis can only start a log".into(),
            ));
        }

        let heads = self
            .frontier
            .iter()
            .filter_map(|hash| self.arena.get(hash))
            .map(Entry::clock);
        let clock = LogicalClock::checked_next_after(heads).ok_or_else(|| {
            EngineError::InvalidOperation("logical clock exhausted on this log".into())
        })?;
        let entry = EntryBuilder::new(operation)
            .clock(clock)
            .predecessors(self.frontier.iter().copied())
            .sign(identity)?;

        validate_entry(&entry).map_err(signature_error)?;
        validate_causal_links(&entry, &self.arena)?;
        if !self.access.check(&entry, &self.arena) {
            return Err(EngineError::Unauthorized {
                author: *entry.author(),
            });
        }
        Ok(entry)
    }

    /// Store a prepared entry and make it part of the log.
    pub async fn commit(&mut self, entry: Entry) -> Result<()> {
        let (hash, clock, kind) = (entry.hash, entry.clock(), entry.kind());
        self.store_and_insert(vec![entry]).await?;
        debug!(entry = %hash, clock = %clock, kind = ?kind, "appended");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get(&self, hash: &EntryHash) -> Result<&Entry> {
        self.arena.get(hash).ok_or(EngineError::NotFound(*hash))
    }

    /// Entries not reachable from `known`, in causal order.
    pub fn entries_since(&self, known: impl IntoIterator<Item = EntryHash>) -> Vec<Entry> {
        self.arena.entries_since(known)
    }

    /// The whole log in causal order.
    pub fn causal_entries(&self) -> Vec<Entry> {
        self.arena.causal_entries()
    }

    /// Keys allowed to write on top of the current frontier.
    pub fn writers(&self) -> BTreeSet<PublicKeyId> {
        self.access
            .resolve_policy(&self.frontier.to_vec(), &self.arena)
            .authorized_keys()
            .clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Merge
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide which candidates would join the log.
    ///
    /// Candidates are deduplicated, ordered causally and checked one by one:
    /// structure, hashes and signature, then presence and clocks of
    /// predecessors, then authorization under the policy at those
    /// predecessors. Genesis entries of other lineages pass only when
    /// `allow_foreign` is set. Failures are counted, never returned.
    pub fn plan_merge(&self, candidates: impl IntoIterator<Item = Entry>, allow_foreign: bool) -> MergePlan {
        let mut duplicates = 0;
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        for entry in candidates {
            if self.arena.contains(&entry.hash) || !seen.insert(entry.hash) {
                duplicates += 1;
            } else {
                fresh.push(entry);
            }
        }

        let mut access = self.access.clone();
        let mut staged: HashMap<EntryHash, Entry> = HashMap::new();
        let mut accepted = Vec::new();
        let mut dropped = 0;

        for entry in causal_sort(fresh) {
            let lookup = (&self.arena, &staged);
            let verdict = validate_entry(&entry)
                .and_then(|()| self.check_lineage(&entry, allow_foreign))
                .and_then(|()| validate_causal_links(&entry, &lookup));

            if let Err(e) = verdict {
                warn!(entry = %entry.hash, error = %e, "dropping invalid entry");
                dropped += 1;
                continue;
            }
            if !access.check(&entry, &lookup) {
                warn!(entry = %entry.hash, author = %entry.author(), "dropping unauthorized entry");
                dropped += 1;
                continue;
            }

            staged.insert(entry.hash, entry.clone());
            accepted.push(entry);
        }

        MergePlan {
            accepted,
            duplicates,
            dropped,
            access,
        }
    }

    /// Store and insert the entries of a plan. Returns them in causal order.
    pub async fn integrate(&mut self, plan: MergePlan) -> Result<Vec<Entry>> {
        let MergePlan {
            accepted, access, ..
        } = plan;
        if accepted.is_empty() {
            return Ok(accepted);
        }

        self.store_and_insert(accepted.clone()).await?;
        self.access = access;
        debug!(
            address = %self.address,
            integrated = accepted.len(),
            heads = self.frontier.len(),
            "integrated entries"
        );
        Ok(accepted)
    }

    fn check_lineage(&self, entry: &Entry, allow_foreign: bool) -> std::result::Result<(), ValidationError> {
        if entry.is_genesis() && entry.hash != self.root() && !allow_foreign {
            return Err(ValidationError::StructuralError(format!(
                "genesis {} belongs to another log",
                entry.hash
            )));
        }
        Ok(())
    }

    /// Persist first, then update memory, so a storage failure leaves the
    /// in-memory log untouched.
    async fn store_and_insert(&mut self, entries: Vec<Entry>) -> Result<()> {
        self.store.insert_batch(&self.address.root(), &entries).await?;
        for entry in entries {
            self.frontier.advance(&entry);
            self.arena.insert(entry);
        }
        Ok(())
    }
}

fn signature_error(e: ValidationError) -> EngineError {
    EngineError::SignatureError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmesh_core::Keypair;
    use docmesh_store::MemoryStore;
    use serde_json::json;

    async fn new_log(owner: &Keypair) -> (EntryLog, Entry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let (log, genesis) = EntryLog::create(store.clone(), owner, "log", [owner.public_key()])
            .await
            .unwrap();
        (log, genesis, store)
    }

    #[tokio::test]
    async fn test_create_and_append() {
        let owner = Keypair::from_seed(&[1; 32]);
        let (mut log, genesis, store) = new_log(&owner).await;

        assert_eq!(log.root(), genesis.hash);
        assert_eq!(log.address().name(), "log");
        assert_eq!(log.frontier().to_vec(), vec![genesis.hash]);

        let entry = log
            .append(Operation::put("a", json!(1)), &owner)
            .await
            .unwrap();
        assert_eq!(entry.predecessors(), &[genesis.hash]);
        assert_eq!(entry.clock(), genesis.clock().tick());
        assert_eq!(log.frontier().to_vec(), vec![entry.hash]);
        assert_eq!(log.get(&entry.hash).unwrap(), &entry);
        assert_eq!(store.count_entries(&log.root()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_rejects_genesis_and_strangers() {
        let owner = Keypair::from_seed(&[1; 32]);
        let stranger = Keypair::from_seed(&[2; 32]);
        let (mut log, _, _) = new_log(&owner).await;

        assert!(matches!(
            log.append(Operation::genesis("x", [owner.public_key()]), &owner).await,
            Err(EngineError::InvalidOperation(_))
        ));
        assert!(matches!(
            log.append(Operation::put("a", json!(1)), &stranger).await,
            Err(EngineError::Unauthorized { author }) if author == stranger.public_key()
        ));
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_entry() {
        let owner = Keypair::from_seed(&[1; 32]);
        let (log, _, _) = new_log(&owner).await;
        assert!(matches!(
            log.get(&EntryHash([7; 32])),
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_plan_merge_out_of_order_with_duplicates() {
        let owner = Keypair::from_seed(&[1; 32]);
        let (mut source, genesis, _) = new_log(&owner).await;
        let a = source.append(Operation::put("a", json!(1)), &owner).await.unwrap();
        let b = source.append(Operation::put("b", json!(2)), &owner).await.unwrap();

        let target = EntryLog::empty(Arc::new(MemoryStore::new()), source.address().clone());
        let plan = target.plan_merge(
            vec![b.clone(), a.clone(), b.clone(), genesis.clone()],
            false,
        );

        assert_eq!(plan.duplicates, 1);
        assert_eq!(plan.dropped, 0);
        let order: Vec<_> = plan.accepted.iter().map(|e| e.hash).collect();
        assert_eq!(order, vec![genesis.hash, a.hash, b.hash]);
        assert_eq!(target.len(), 0);
    }

    #[tokio::test]
    async fn test_plan_merge_drops_invalid() {
        let owner = Keypair::from_seed(&[1; 32]);
        let stranger = Keypair::from_seed(&[9; 32]);
        let (mut log, genesis, _) = new_log(&owner).await;

        let forged = EntryBuilder::new(Operation::put("x", json!("evil")))
            .clock(LogicalClock::new(2))
            .predecessors([genesis.hash])
            .sign(&stranger)
            .unwrap();
        let orphan = EntryBuilder::new(Operation::put("y", json!(1)))
            .clock(LogicalClock::new(5))
            .predecessors([EntryHash([3; 32])])
            .sign(&owner)
            .unwrap();
        let stale_clock = EntryBuilder::new(Operation::put("z", json!(1)))
            .clock(LogicalClock::GENESIS)
            .predecessors([genesis.hash])
            .sign(&owner)
            .unwrap();
        let mut tampered = EntryBuilder::new(Operation::put("w", json!(1)))
            .clock(LogicalClock::new(2))
            .predecessors([genesis.hash])
            .sign(&owner)
            .unwrap();
        tampered.operation = Operation::put("w", json!(2));

        let plan = log.plan_merge(vec![forged, orphan, stale_clock, tampered], true);
        assert_eq!(plan.dropped, 4);
        assert!(plan.is_empty());

        let integrated = log.integrate(plan).await.unwrap();
        assert!(integrated.is_empty());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_lineage_gated() {
        let owner = Keypair::from_seed(&[1; 32]);
        let other = Keypair::from_seed(&[2; 32]);
        let (log, _, _) = new_log(&owner).await;
        let (mut foreign, foreign_genesis, _) = new_log(&other).await;
        let foreign_put = foreign.append(Operation::put("f", json!(1)), &other).await.unwrap();

        let refused = log.plan_merge(vec![foreign_genesis.clone(), foreign_put.clone()], false);
        assert_eq!(refused.dropped, 2);

        let allowed = log.plan_merge(vec![foreign_genesis, foreign_put], true);
        assert_eq!(allowed.accepted.len(), 2);
        assert_eq!(allowed.dropped, 0);
    }

    #[tokio::test]
    async fn test_integrate_unions_frontiers() {
        let owner = Keypair::from_seed(&[1; 32]);
        let (mut a, genesis, _) = new_log(&owner).await;

        let mut b = EntryLog::empty(Arc::new(MemoryStore::new()), a.address().clone());
        let plan = b.plan_merge(vec![genesis.clone()], false);
        b.integrate(plan).await.unwrap();

        let from_a = a.append(Operation::put("a", json!(1)), &owner).await.unwrap();
        let from_b = b.append(Operation::put("b", json!(2)), &owner).await.unwrap();

        let plan = a.plan_merge(b.causal_entries(), false);
        assert_eq!(plan.duplicates, 1);
        let added = a.integrate(plan).await.unwrap();
        assert_eq!(added, vec![from_b.clone()]);

        let heads: BTreeSet<_> = [from_a.hash, from_b.hash].into_iter().collect();
        assert_eq!(a.frontier().heads(), &heads);

        let joined = a.append(Operation::delete("a"), &owner).await.unwrap();
        assert_eq!(joined.predecessors().len(), 2);
        assert_eq!(a.frontier().to_vec(), vec![joined.hash]);
        assert_eq!(a.entries_since([from_a.hash]).len(), 2);
    }

    #[tokio::test]
    async fn test_writers_follow_policy() {
        let owner = Keypair::from_seed(&[1; 32]);
        let guest = Keypair::from_seed(&[2; 32]);
        let (mut log, _, _) = new_log(&owner).await;

        log.append(Operation::Grant { key: guest.public_key() }, &owner)
            .await
            .unwrap();
        assert!(log.writers().contains(&guest.public_key()));
        log.append(Operation::put("g", json!(true)), &guest).await.unwrap();

        log.append(Operation::Revoke { key: guest.public_key() }, &owner)
            .await
            .unwrap();
        assert!(!log.writers().contains(&guest.public_key()));
        assert!(log.append(Operation::put("g", json!(false)), &guest).await.is_err());
    }
}
