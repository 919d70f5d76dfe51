//! Materializer: folds document operations into a key → document view.
//!
//! Each key remembers the stamp `(clock, hash)` of the entry that last
//! wrote it, and a later fold only wins with a greater stamp. Deletes leave
//! a stamped tombstone. The view therefore depends only on the set of
//! folded entries, never on the order they arrived in.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::clock::LogicalClock;
use crate::entry::{Entry, Operation};
use crate::types::EntryHash;

/// Position of an entry in the deterministic total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    pub clock: LogicalClock,
    pub hash: EntryHash,
}

impl From<&Entry> for Stamp {
    fn from(entry: &Entry) -> Self {
        Self {
            clock: entry.clock(),
            hash: entry.hash,
        }
    }
}

/// A visible change to one document.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Put { key: String, value: Value },
    Delete { key: String },
}

impl Change {
    pub fn key(&self) -> &str {
        match self {
            Change::Put { key, .. } | Change::Delete { key } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    stamp: Stamp,
    value: Option<Value>,
}

/// The materialized documents of a log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentView {
    slots: BTreeMap<String, Slot>,
}

impl DocumentView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay entries from scratch.
    pub fn rebuild<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Self {
        let mut view = Self::new();
        for entry in entries {
            view.fold(entry);
        }
        view
    }

    /// Apply one entry. Returns the visible change, if any.
    ///
    /// Non-document operations are ignored.
    pub fn fold(&mut self, entry: &Entry) -> Option<Change> {
        let (key, value) = self.wins(entry)?;
        let change = self.preview(entry);
        self.slots.insert(
            key.to_string(),
            Slot {
                stamp: Stamp::from(entry),
                value: value.cloned(),
            },
        );
        change
    }

    /// The change [`fold`](Self::fold) would report, without applying it.
    pub fn preview(&self, entry: &Entry) -> Option<Change> {
        let (key, value) = self.wins(entry)?;
        match value {
            Some(value) => Some(Change::Put {
                key: key.to_string(),
                value: value.clone(),
            }),
            None if self.get(key).is_some() => Some(Change::Delete {
                key: key.to_string(),
            }),
            None => None,
        }
    }

    /// The key and value `entry` would write, if it beats the current slot.
    fn wins<'e>(&self, entry: &'e Entry) -> Option<(&'e str, Option<&'e Value>)> {
        let (key, value) = match &entry.operation {
            Operation::Put { key, value } => (key, Some(value)),
            Operation::Delete { key } => (key, None),
            _ => return None,
        };
        match self.slots.get(key) {
            Some(slot) if slot.stamp >= Stamp::from(entry) => None,
            _ => Some((key.as_str(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.slots.get(key).and_then(|s| s.value.as_ref())
    }

    /// The stamp of the entry currently deciding `key`, tombstones included.
    pub fn stamp(&self, key: &str) -> Option<Stamp> {
        self.slots.get(key).map(|s| s.stamp)
    }

    /// Live documents in key order.
    pub fn documents(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slots
            .iter()
            .filter_map(|(k, s)| s.value.as_ref().map(|v| (k.as_str(), v)))
    }

    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.documents()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.documents().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The changes that turn this view's live documents into `target`'s.
    pub fn diff(&self, target: &DocumentView) -> Vec<Change> {
        let mut changes = Vec::new();
        for (key, value) in target.documents() {
            if self.get(key) != Some(value) {
                changes.push(Change::Put {
                    key: key.to_string(),
                    value: value.clone(),
                });
            }
        }
        for (key, _) in self.documents() {
            if target.get(key).is_none() {
                changes.push(Change::Delete {
                    key: key.to_string(),
                });
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::causal::causal_sort;
    use crate::crypto::Keypair;
    use crate::entry::EntryBuilder;
    use serde_json::json;

    fn entry(kp: &Keypair, op: Operation, clock: u64, pred: EntryHash) -> Entry {
        EntryBuilder::new(op)
            .clock(LogicalClock(clock))
            .predecessors([pred])
            .sign(kp)
            .unwrap()
    }

    #[test]
    fn test_preview_does_not_mutate() {
        let kp = Keypair::from_seed(&[1; 32]);
        let put = entry(&kp, Operation::put("a", json!(1)), 2, EntryHash([0; 32]));

        let view = DocumentView::new();
        let previewed = view.preview(&put);
        assert!(view.is_empty());

        let mut folded = view.clone();
        assert_eq!(folded.fold(&put), previewed);
        assert_eq!(folded.preview(&put), None);
    }

    #[test]
    fn test_put_then_delete() {
        let kp = Keypair::from_seed(&[1; 32]);
        let root = EntryHash([0; 32]);
        let put = entry(&kp, Operation::put("a", json!({"v": 1})), 2, root);
        let del = entry(&kp, Operation::delete("a"), 3, put.hash);

        let mut view = DocumentView::new();
        assert!(matches!(view.fold(&put), Some(Change::Put { .. })));
        assert_eq!(view.get("a"), Some(&json!({"v": 1})));
        assert_eq!(view.fold(&del), Some(Change::Delete { key: "a".into() }));
        assert_eq!(view.get("a"), None);
        assert!(view.is_empty());
    }

    #[test]
    fn test_last_writer_wins_regardless_of_arrival() {
        let kp1 = Keypair::from_seed(&[1; 32]);
        let kp2 = Keypair::from_seed(&[2; 32]);
        let root = EntryHash([0; 32]);
        let older = entry(&kp1, Operation::put("k", json!("old")), 2, root);
        let newer = entry(&kp2, Operation::put("k", json!("new")), 3, root);

        let mut forward = DocumentView::new();
        forward.fold(&older);
        forward.fold(&newer);

        let mut backward = DocumentView::new();
        backward.fold(&newer);
        assert_eq!(backward.fold(&older), None);

        assert_eq!(forward, backward);
        assert_eq!(forward.get("k"), Some(&json!("new")));
    }

    #[test]
    fn test_equal_clocks_break_ties_by_hash() {
        let kp1 = Keypair::from_seed(&[1; 32]);
        let kp2 = Keypair::from_seed(&[2; 32]);
        let root = EntryHash([0; 32]);
        let x = entry(&kp1, Operation::put("k", json!("x")), 2, root);
        let y = entry(&kp2, Operation::put("k", json!("y")), 2, root);

        let winner = if x.hash > y.hash { &x } else { &y };
        let view = DocumentView::rebuild([&x, &y]);
        assert_eq!(view.get("k"), winner.operation_value());
        assert_eq!(view, DocumentView::rebuild([&y, &x]));
    }

    #[test]
    fn test_stale_delete_keeps_newer_put() {
        let kp = Keypair::from_seed(&[1; 32]);
        let root = EntryHash([0; 32]);
        let del = entry(&kp, Operation::delete("k"), 2, root);
        let put = entry(&kp, Operation::put("k", json!(1)), 5, root);

        let mut view = DocumentView::new();
        assert_eq!(view.fold(&del), None);
        view.fold(&put);
        assert_eq!(view.get("k"), Some(&json!(1)));
        assert_eq!(view.stamp("k"), Some(Stamp::from(&put)));
    }

    #[test]
    fn test_rebuild_matches_incremental() {
        let kp = Keypair::from_seed(&[3; 32]);
        let root = EntryHash([0; 32]);
        let a = entry(&kp, Operation::put("a", json!(1)), 2, root);
        let b = entry(&kp, Operation::put("b", json!(2)), 3, a.hash);
        let c = entry(&kp, Operation::delete("a"), 4, b.hash);

        let mut incremental = DocumentView::new();
        for e in [&c, &a, &b] {
            incremental.fold(e);
        }
        let ordered = causal_sort([a, b, c]);
        assert_eq!(DocumentView::rebuild(&ordered), incremental);
        assert_eq!(incremental.to_map(), BTreeMap::from([("b".to_string(), json!(2))]));
    }

    #[test]
    fn test_diff() {
        let kp = Keypair::from_seed(&[4; 32]);
        let root = EntryHash([0; 32]);
        let a = entry(&kp, Operation::put("a", json!(1)), 2, root);
        let b = entry(&kp, Operation::put("b", json!(2)), 2, root);
        let a2 = entry(&kp, Operation::put("a", json!(3)), 3, a.hash);

        let from = DocumentView::rebuild([&a]);
        let to = DocumentView::rebuild([&a2, &b]);
        let changes = from.diff(&to);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| matches!(c, Change::Put { .. })));

        let back = to.diff(&from);
        assert!(back.contains(&Change::Delete { key: "b".into() }));
        assert!(from.diff(&from).is_empty());
    }

    trait OperationValue {
        fn operation_value(&self) -> Option<&Value>;
    }

    impl OperationValue for Entry {
        fn operation_value(&self) -> Option<&Value> {
            match &self.operation {
                Operation::Put { value, .. } => Some(value),
                _ => None,
            }
        }
    }
}
