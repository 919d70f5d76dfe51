//! Access controller: resolves the policy in force at an entry and caches
//! per-entry verdicts.
//!
//! Policy-change entries are judged by the same rule as every other entry,
//! so a key outside the policy cannot grant itself access. The first check
//! of an entry judges its unjudged policy ancestors oldest first; every
//! verdict is then cached by hash.
//!
//! Each entry's set of policy ancestors is remembered too. An entry's set is
//! the union of its predecessors' sets, so resolving the policy never walks
//! past an entry whose set is already known.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use docmesh_core::{causal_sort, Entry, EntryHash, EntryLookup, Operation};

use crate::error::{PermsError, Result};
use crate::policy::AccessPolicy;

/// Decide whether `entry` may be appended under `policy_at_predecessors`.
///
/// A genesis entry has no predecessors and authorizes itself exactly when
/// its author is among the writers it declares.
pub fn is_authorized(entry: &Entry, policy_at_predecessors: &AccessPolicy) -> bool {
    match &entry.operation {
        Operation::Genesis { writers, .. } => {
            entry.predecessors().is_empty() && writers.contains(entry.author())
        }
        _ => policy_at_predecessors.is_authorized(entry.author()),
    }
}

/// Policy entries at or before an entry.
type PolicySet = Arc<BTreeSet<EntryHash>>;

/// Policy sets found during one lookup. The flag is false when some ancestor
/// was missing from the log, and such sets are never remembered.
type FreshSets = HashMap<EntryHash, (PolicySet, bool)>;

/// Resolves policies over a log and remembers verdicts.
#[derive(Debug, Default, Clone)]
pub struct AccessController {
    verdicts: HashMap<EntryHash, bool>,
    policy_sets: HashMap<EntryHash, PolicySet>,
}

impl AccessController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached verdict for an entry, if it has been judged.
    pub fn verdict(&self, hash: &EntryHash) -> Option<bool> {
        self.verdicts.get(hash).copied()
    }

    pub fn judged(&self) -> usize {
        self.verdicts.len()
    }

    /// Fold the authorized policy operations among the ancestors of
    /// `predecessors`, in causal order.
    ///
    /// Ancestors without a positive verdict do not contribute.
    pub fn resolve_policy<L: EntryLookup + ?Sized>(
        &self,
        predecessors: &[EntryHash],
        log: &L,
    ) -> AccessPolicy {
        let mut fresh = FreshSets::new();
        let ancestors = self.policy_ancestors(predecessors, log, &mut fresh);
        self.fold_policy(&ancestors)
    }

    fn fold_policy(&self, ancestors: &[Entry]) -> AccessPolicy {
        let mut policy = AccessPolicy::new();
        for entry in ancestors {
            if self.verdict(&entry.hash) == Some(true) {
                policy.apply(&entry.operation);
            }
        }
        policy
    }

    /// Judge an entry against the policy at its predecessors.
    ///
    /// `log` must contain the entry's ancestors; the entry itself need not be
    /// present.
    pub fn check<L: EntryLookup + ?Sized>(&mut self, entry: &Entry, log: &L) -> bool {
        if let Some(verdict) = self.verdict(&entry.hash) {
            return verdict;
        }

        let mut fresh = FreshSets::new();
        let ancestors = self.policy_ancestors(entry.predecessors(), log, &mut fresh);
        for ancestor in &ancestors {
            if !self.verdicts.contains_key(&ancestor.hash) {
                let before = self.policy_ancestors(ancestor.predecessors(), log, &mut fresh);
                let verdict = is_authorized(ancestor, &self.fold_policy(&before));
                self.record(ancestor.hash, verdict);
            }
        }

        let verdict = is_authorized(entry, &self.fold_policy(&ancestors));
        self.record(entry.hash, verdict);
        for (hash, (set, complete)) in fresh {
            if complete {
                self.policy_sets.insert(hash, set);
            }
        }
        verdict
    }

    /// Like [`check`](Self::check), returning an error for rejected entries.
    pub fn require<L: EntryLookup + ?Sized>(&mut self, entry: &Entry, log: &L) -> Result<()> {
        if self.check(entry, log) {
            return Ok(());
        }
        if entry.is_genesis() {
            return Err(PermsError::InvalidGenesis(entry.hash));
        }
        Err(PermsError::Unauthorized {
            author: *entry.author(),
            entry: entry.hash,
        })
    }

    /// Forget every verdict.
    pub fn clear(&mut self) {
        self.verdicts.clear();
        self.policy_sets.clear();
    }

    fn record(&mut self, hash: EntryHash, verdict: bool) {
        debug!(entry = %hash, authorized = verdict, "access verdict");
        self.verdicts.insert(hash, verdict);
    }
}

impl AccessController {
    /// Policy-kind entries among the ancestors of `predecessors`, causally
    /// sorted.
    fn policy_ancestors<L: EntryLookup + ?Sized>(
        &self,
        predecessors: &[EntryHash],
        log: &L,
        fresh: &mut FreshSets,
    ) -> Vec<Entry> {
        self.fill_policy_sets(predecessors, log, fresh);
        let mut hashes = BTreeSet::new();
        for pred in predecessors {
            if let Some((set, _)) = self.policy_set(pred, fresh) {
                hashes.extend(set.iter().copied());
            }
        }
        causal_sort(
            hashes
                .iter()
                .filter_map(|hash| log.lookup_entry(hash))
                .cloned(),
        )
    }

    fn policy_set(&self, hash: &EntryHash, fresh: &FreshSets) -> Option<(PolicySet, bool)> {
        match self.policy_sets.get(hash) {
            Some(set) => Some((set.clone(), true)),
            None => fresh.get(hash).cloned(),
        }
    }

    /// Compute the policy sets of `start` and every ancestor not yet known.
    fn fill_policy_sets<L: EntryLookup + ?Sized>(
        &self,
        start: &[EntryHash],
        log: &L,
        fresh: &mut FreshSets,
    ) {
        let known = |hash: &EntryHash, fresh: &FreshSets| {
            self.policy_sets.contains_key(hash) || fresh.contains_key(hash)
        };
        let mut stack: Vec<(EntryHash, bool)> = start.iter().map(|h| (*h, false)).collect();

        while let Some((hash, expanded)) = stack.pop() {
            if known(&hash, fresh) {
                continue;
            }
            let Some(entry) = log.lookup_entry(&hash) else {
                continue;
            };
            if !expanded {
                stack.push((hash, true));
                stack.extend(
                    entry
                        .predecessors()
                        .iter()
                        .filter(|p| !known(p, fresh))
                        .map(|p| (*p, false)),
                );
                continue;
            }

            let mut complete = true;
            let mut parents = Vec::with_capacity(entry.predecessors().len());
            for pred in entry.predecessors() {
                match self.policy_set(pred, fresh) {
                    Some((set, whole)) => {
                        complete &= whole;
                        parents.push(set);
                    }
                    None => complete = false,
                }
            }

            let is_policy = entry.kind().is_policy();
            let set = match parents.as_slice() {
                [only] if !is_policy => only.clone(),
                _ => {
                    let mut set: BTreeSet<EntryHash> =
                        parents.iter().flat_map(|s| s.iter().copied()).collect();
                    if is_policy {
                        set.insert(hash);
                    }
                    Arc::new(set)
                }
            };
            fresh.insert(hash, (set, complete));
        }
    }
}
