//! Access policy: the set of keys allowed to append to a log.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use docmesh_core::{Operation, PublicKeyId};

/// Keys authorized to append, as of some point in a log's history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    authorized_keys: BTreeSet<PublicKeyId>,
}

impl AccessPolicy {
    /// An empty policy (nobody may write).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_keys(keys: impl IntoIterator<Item = PublicKeyId>) -> Self {
        Self {
            authorized_keys: keys.into_iter().collect(),
        }
    }

    pub fn is_authorized(&self, key: &PublicKeyId) -> bool {
        self.authorized_keys.contains(key)
    }

    pub fn authorized_keys(&self) -> &BTreeSet<PublicKeyId> {
        &self.authorized_keys
    }

    pub fn len(&self) -> usize {
        self.authorized_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorized_keys.is_empty()
    }

    /// Apply a policy-change operation. Returns whether the policy changed.
    ///
    /// Document operations leave the policy untouched.
    pub fn apply(&mut self, operation: &Operation) -> bool {
        match operation {
            Operation::Genesis { writers, .. } => {
                let before = self.authorized_keys.len();
                self.authorized_keys.extend(writers.iter().copied());
                self.authorized_keys.len() != before
            }
            Operation::Grant { key } => self.authorized_keys.insert(*key),
            Operation::Revoke { key } => self.authorized_keys.remove(key),
            Operation::Put { .. } | Operation::Delete { .. } => false,
        }
    }
}
