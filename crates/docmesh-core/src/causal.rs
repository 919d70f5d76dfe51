//! Causal graph: a hash-keyed arena of entries, deterministic topological
//! ordering, and the frontier of latest entries.
//!
//! All traversals are iterative over hash links; history depth never
//! touches the call stack.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::clock::LogicalClock;
use crate::entry::Entry;
use crate::types::EntryHash;

/// Read access to entries by hash.
pub trait EntryLookup {
    fn lookup_entry(&self, hash: &EntryHash) -> Option<&Entry>;
}

impl<T: EntryLookup + ?Sized> EntryLookup for &T {
    fn lookup_entry(&self, hash: &EntryHash) -> Option<&Entry> {
        (**self).lookup_entry(hash)
    }
}

impl EntryLookup for HashMap<EntryHash, Entry> {
    fn lookup_entry(&self, hash: &EntryHash) -> Option<&Entry> {
        self.get(hash)
    }
}

/// Look up in the first source, then the second.
impl<A: EntryLookup, B: EntryLookup> EntryLookup for (A, B) {
    fn lookup_entry(&self, hash: &EntryHash) -> Option<&Entry> {
        self.0.lookup_entry(hash).or_else(|| self.1.lookup_entry(hash))
    }
}

/// Collect `start` and every entry reachable from it through predecessor links.
///
/// Hashes the lookup does not know are skipped.
pub fn ancestor_closure<L: EntryLookup + ?Sized>(
    lookup: &L,
    start: impl IntoIterator<Item = EntryHash>,
) -> HashSet<EntryHash> {
    let mut seen = HashSet::new();
    let mut stack: Vec<EntryHash> = start.into_iter().collect();

    while let Some(hash) = stack.pop() {
        let Some(entry) = lookup.lookup_entry(&hash) else {
            continue;
        };
        if !seen.insert(hash) {
            continue;
        }
        stack.extend(entry.predecessors().iter().copied());
    }

    seen
}

/// Sort entries so that every predecessor precedes its successors.
///
/// Concurrent entries are ordered by `(clock, hash)` ascending, so the result
/// depends only on the set of entries, not on input order. Duplicates are
/// collapsed. Predecessors outside the input set are treated as satisfied.
pub fn causal_sort(entries: impl IntoIterator<Item = Entry>) -> Vec<Entry> {
    let mut by_hash: HashMap<EntryHash, Entry> = HashMap::new();
    for entry in entries {
        by_hash.entry(entry.hash).or_insert(entry);
    }

    let mut in_degree: HashMap<EntryHash, usize> = HashMap::with_capacity(by_hash.len());
    let mut children: HashMap<EntryHash, Vec<EntryHash>> = HashMap::new();
    for (hash, entry) in &by_hash {
        let mut degree = 0;
        for pred in entry.predecessors() {
            if by_hash.contains_key(pred) {
                degree += 1;
                children.entry(*pred).or_default().push(*hash);
            }
        }
        in_degree.insert(*hash, degree);
    }

    let mut ready: BTreeSet<(LogicalClock, EntryHash)> = by_hash
        .values()
        .filter(|e| in_degree.get(&e.hash) == Some(&0))
        .map(Entry::order_key)
        .collect();

    let mut ordered = Vec::with_capacity(by_hash.len());
    while let Some((_, hash)) = ready.pop_first() {
        if let Some(kids) = children.get(&hash) {
            for child in kids {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        if let Some(entry) = by_hash.get(child) {
                            ready.insert(entry.order_key());
                        }
                    }
                }
            }
        }
        if let Some(entry) = by_hash.remove(&hash) {
            ordered.push(entry);
        }
    }

    ordered
}

/// Content-hash keyed store of every entry known for one log.
#[derive(Debug, Clone, Default)]
pub struct EntryArena {
    entries: HashMap<EntryHash, Entry>,
}

impl EntryArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &EntryHash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get(&self, hash: &EntryHash) -> Option<&Entry> {
        self.entries.get(hash)
    }

    /// Insert an entry. Returns false if it was already present.
    pub fn insert(&mut self, entry: Entry) -> bool {
        if self.entries.contains_key(&entry.hash) {
            return false;
        }
        self.entries.insert(entry.hash, entry);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// The whole log in causal order.
    pub fn causal_entries(&self) -> Vec<Entry> {
        causal_sort(self.entries.values().cloned())
    }

    /// Entries not reachable from `known`, in causal order.
    pub fn entries_since(&self, known: impl IntoIterator<Item = EntryHash>) -> Vec<Entry> {
        let covered = ancestor_closure(self, known);
        causal_sort(
            self.entries
                .values()
                .filter(|e| !covered.contains(&e.hash))
                .cloned(),
        )
    }

    /// The maximal entries of the arena, computed from scratch.
    pub fn compute_frontier(&self) -> Frontier {
        let referenced: HashSet<&EntryHash> = self
            .entries
            .values()
            .flat_map(|e| e.predecessors().iter())
            .collect();
        Frontier(
            self.entries
                .keys()
                .filter(|h| !referenced.contains(h))
                .copied()
                .collect(),
        )
    }
}

impl EntryLookup for EntryArena {
    fn lookup_entry(&self, hash: &EntryHash) -> Option<&Entry> {
        self.entries.get(hash)
    }
}

/// The set of causally latest entries of a log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontier(BTreeSet<EntryHash>);

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heads(&self) -> &BTreeSet<EntryHash> {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntryHash> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, hash: &EntryHash) -> bool {
        self.0.contains(hash)
    }

    /// Advance past an entry: its predecessors stop being heads and it
    /// becomes one.
    ///
    /// Entries must be fed in causal order.
    pub fn advance(&mut self, entry: &Entry) {
        for pred in entry.predecessors() {
            self.0.remove(pred);
        }
        self.0.insert(entry.hash);
    }

    /// Heads as a sorted vector, ready to use as predecessors.
    pub fn to_vec(&self) -> Vec<EntryHash> {
        self.0.iter().copied().collect()
    }
}

impl FromIterator<EntryHash> for Frontier {
    fn from_iter<I: IntoIterator<Item = EntryHash>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
