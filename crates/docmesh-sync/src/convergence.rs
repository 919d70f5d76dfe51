//! Convergence verification between replicas.
//!
//! Replicas that hold the same set of entries for a log must hold the same
//! frontier and the same materialized documents. Digests let two replicas
//! compare both without exchanging either.

use serde::{Deserialize, Serialize};

use docmesh_core::{Blake3Hash, DocumentView, EntryHash, Frontier};

/// Hash of a frontier: the sorted head hashes, domain separated.
pub fn frontier_hash(frontier: &Frontier) -> Blake3Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"docmesh-frontier-v0:");
    for head in frontier.iter() {
        hasher.update(head.as_bytes());
    }
    Blake3Hash(*hasher.finalize().as_bytes())
}

/// Hash of a materialized view.
///
/// Documents are hashed in key order as length-prefixed key and JSON text,
/// so equal views hash equally regardless of how they were built.
pub fn view_hash(view: &DocumentView) -> Blake3Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"docmesh-view-v0:");
    for (key, value) in view.documents() {
        let json = value.to_string();
        hasher.update(&(key.len() as u64).to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update(&(json.len() as u64).to_be_bytes());
        hasher.update(json.as_bytes());
    }
    Blake3Hash(*hasher.finalize().as_bytes())
}

/// Summary of one replica's state for a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDigest {
    pub root: EntryHash,
    pub entries: u64,
    pub frontier: Blake3Hash,
    pub view: Blake3Hash,
}

impl ReplicaDigest {
    pub fn compute(root: EntryHash, entries: u64, frontier: &Frontier, view: &DocumentView) -> Self {
        Self {
            root,
            entries,
            frontier: frontier_hash(frontier),
            view: view_hash(view),
        }
    }
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both replicas have identical state.
    Converged,
    /// Replicas have not yet exchanged everything (may need another merge).
    NotConverged { reason: String },
    /// Same entries but different documents. Indicates a nondeterministic
    /// materializer and is never expected.
    Diverged {
        local_view: Blake3Hash,
        remote_view: Blake3Hash,
    },
}

impl ConvergenceResult {
    /// Check if replicas have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }

    pub fn is_diverged(&self) -> bool {
        matches!(self, ConvergenceResult::Diverged { .. })
    }
}

/// Compare two replica digests.
pub fn verify_convergence(local: &ReplicaDigest, remote: &ReplicaDigest) -> ConvergenceResult {
    if local.root != remote.root {
        return ConvergenceResult::NotConverged {
            reason: format!("different logs: local={}, remote={}", local.root, remote.root),
        };
    }

    if local.entries != remote.entries || local.frontier != remote.frontier {
        return ConvergenceResult::NotConverged {
            reason: format!(
                "history mismatch: local has {} entries, remote has {}",
                local.entries, remote.entries
            ),
        };
    }

    if local.view != remote.view {
        return ConvergenceResult::Diverged {
            local_view: local.view,
            remote_view: remote.view,
        };
    }

    ConvergenceResult::Converged
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmesh_core::{EntryBuilder, Keypair, LogicalClock, Operation};
    use serde_json::json;

    fn chain(keypair: &Keypair, values: &[i64]) -> Vec<docmesh_core::Entry> {
        let genesis = EntryBuilder::new(Operation::genesis("c", [keypair.public_key()]))
            .sign(keypair)
            .unwrap();
        let mut entries = vec![genesis];
        for (i, v) in values.iter().enumerate() {
            let parent = entries.last().unwrap().hash;
            let entry = EntryBuilder::new(Operation::put("k", json!(v)))
                .clock(LogicalClock::new(i as u64 + 2))
                .predecessors([parent])
                .sign(keypair)
                .unwrap();
            entries.push(entry);
        }
        entries
    }

    fn digest(entries: &[docmesh_core::Entry]) -> ReplicaDigest {
        let mut frontier = Frontier::new();
        for entry in entries {
            frontier.advance(entry);
        }
        ReplicaDigest::compute(
            entries[0].hash,
            entries.len() as u64,
            &frontier,
            &DocumentView::rebuild(entries),
        )
    }

    #[test]
    fn test_identical_replicas_converge() {
        let keypair = Keypair::from_seed(&[4; 32]);
        let entries = chain(&keypair, &[1, 2, 3]);
        assert!(verify_convergence(&digest(&entries), &digest(&entries)).is_converged());
    }

    #[test]
    fn test_behind_replica_not_converged() {
        let keypair = Keypair::from_seed(&[4; 32]);
        let entries = chain(&keypair, &[1, 2, 3]);
        let result = verify_convergence(&digest(&entries[..2]), &digest(&entries));
        assert!(matches!(result, ConvergenceResult::NotConverged { .. }));
    }

    #[test]
    fn test_view_mismatch_is_divergence() {
        let keypair = Keypair::from_seed(&[4; 32]);
        let entries = chain(&keypair, &[1]);
        let local = digest(&entries);
        let mut remote = local;
        remote.view = Blake3Hash([9; 32]);
        assert!(verify_convergence(&local, &remote).is_diverged());
    }

    #[test]
    fn test_view_hash_separates_key_and_value() {
        let mut a = DocumentView::new();
        let mut b = DocumentView::new();
        let keypair = Keypair::from_seed(&[4; 32]);
        let genesis = chain(&keypair, &[])[0].clone();
        let put = |key: &str, value| {
            EntryBuilder::new(Operation::put(key, value))
                .clock(LogicalClock::new(2))
                .predecessors([genesis.hash])
                .sign(&keypair)
                .unwrap()
        };
        a.fold(&put("ab", json!("c")));
        b.fold(&put("a", json!("bc")));
        assert_ne!(view_hash(&a), view_hash(&b));
        assert_eq!(view_hash(&DocumentView::new()), view_hash(&DocumentView::new()));
    }
}
