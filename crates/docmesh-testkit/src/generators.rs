//! Proptest generators for docmesh types and random histories.

use proptest::prelude::*;
use serde_json::{json, Value};

use docmesh_core::{Entry, EntryHash, Keypair, Operation};

use crate::fixtures::{multi_party_keys, LogFixture};

/// Value written by keys outside the policy. Never visible after a merge.
pub const STRANGER_MARK: &str = "written-by-stranger";

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random entry hash.
pub fn entry_hash() -> impl Strategy<Value = EntryHash> {
    any::<[u8; 32]>().prop_map(EntryHash::from_bytes)
}

/// Generate a document key from a small alphabet, so writes collide.
pub fn document_key() -> impl Strategy<Value = String> {
    "[a-e]".prop_map(String::from)
}

/// Generate a log name.
pub fn log_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}(/[a-z0-9]{1,8})?".prop_map(String::from)
}

/// Generate a small JSON document.
pub fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        any::<f64>()
            .prop_filter("finite", |f| f.is_finite())
            .prop_map(Value::from),
        "[a-z ]{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(2, 8, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            proptest::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// One step of a random history.
#[derive(Debug, Clone)]
pub struct Step {
    /// Index into the writers; one past the end means a stranger.
    pub writer: usize,
    /// Seeds for choosing predecessors among existing entries.
    pub parents: Vec<prop::sample::Index>,
    pub key: String,
    /// `None` deletes the key.
    pub value: Option<Value>,
}

/// Parameters for a random multi-writer history.
#[derive(Debug, Clone)]
pub struct HistoryParams {
    pub writers: usize,
    pub steps: Vec<Step>,
}

impl Arbitrary for HistoryParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (1usize..=3).prop_flat_map(history_params).boxed()
    }
}

/// Histories over a fixed number of writers. Histories with the same writer
/// count share a genesis, so they are branches of one log.
pub fn history_params(writers: usize) -> impl Strategy<Value = HistoryParams> {
    let step = (
        0..=writers,
        proptest::collection::vec(any::<prop::sample::Index>(), 1..=3),
        document_key(),
        proptest::option::weighted(0.8, json_value()),
    )
        .prop_map(|(writer, parents, key, value)| Step {
            writer,
            parents,
            key,
            value,
        });
    proptest::collection::vec(step, 0..24).prop_map(move |steps| HistoryParams { writers, steps })
}

/// A random history: a log plus every entry written into it, including
/// entries by a key the policy never authorized.
pub struct History {
    pub log: LogFixture,
    pub writers: Vec<Keypair>,
    pub stranger: Keypair,
}

impl History {
    /// Every entry, genesis first, in causal order.
    pub fn entries(&self) -> Vec<Entry> {
        self.log.entries()
    }
}

/// Build the history described by `params`.
///
/// Each step signs an entry on top of one to three existing entries, so the
/// result branches and rejoins. Stranger entries are signed by a key outside
/// the policy and write [`STRANGER_MARK`].
pub fn history_from_params(params: &HistoryParams) -> History {
    let writers = multi_party_keys(params.writers);
    let stranger = Keypair::from_seed(&[0xff; 32]);
    let mut log = LogFixture::new(
        writers[0].clone(),
        "history",
        writers[1..].iter().map(|k| k.public_key()),
    );
    let mut hashes = vec![log.genesis.hash];

    for step in &params.steps {
        let mut parents: Vec<EntryHash> = step.parents.iter().map(|i| *i.get(&hashes)).collect();
        parents.sort();
        parents.dedup();

        let (author, value) = match writers.get(step.writer) {
            Some(writer) => (writer, step.value.clone()),
            None => (&stranger, Some(json!(STRANGER_MARK))),
        };
        let operation = match value {
            Some(value) => Operation::put(step.key.clone(), value),
            None => Operation::delete(step.key.clone()),
        };

        let entry = log.append(author, operation, &parents);
        hashes.push(entry.hash);
    }

    History {
        log,
        writers,
        stranger,
    }
}
