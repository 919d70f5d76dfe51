//! Log addresses: the external handle replicas load and merge by.
//!
//! An address binds the hash of a log's genesis entry to a human-facing
//! name. Only the root hash takes part in identity comparisons.
//!
//! String form: `/docmesh/<64 hex chars of root>/<name>`. The name may itself
//! contain `/`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entry::{Entry, Operation};
use crate::error::CoreError;
use crate::types::EntryHash;

/// Leading component of every address string.
pub const ADDRESS_PREFIX: &str = "/docmesh/";

/// Identifier of a log lineage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogAddress {
    root: EntryHash,
    name: String,
}

impl LogAddress {
    /// Derive the address of a log from its genesis entry.
    ///
    /// `name` must equal the name recorded in the genesis operation.
    pub fn derive(genesis: &Entry, name: &str) -> Result<Self, CoreError> {
        match &genesis.operation {
            Operation::Genesis { name: declared, .. } if declared == name => {
                Self::new(genesis.hash, name)
            }
            Operation::Genesis { name: declared, .. } => Err(CoreError::InvalidAddress(format!(
                "name {name:?} does not match genesis name {declared:?}"
            ))),
            _ => Err(CoreError::InvalidAddress(
                "address must be derived from a genesis entry".into(),
            )),
        }
    }

    /// Assemble an address from parts, validating the name.
    pub fn new(root: EntryHash, name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { root, name })
    }

    pub fn root(&self) -> EntryHash {
        self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same lineage: root hashes are equal. Names are ignored.
    pub fn matches(&self, other: &LogAddress) -> bool {
        self.root == other.root
    }

    /// Parse the string form produced by `Display`.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let rest = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or_else(|| CoreError::InvalidAddress(format!("missing {ADDRESS_PREFIX} prefix")))?;
        let (root_hex, name) = rest
            .split_once('/')
            .ok_or_else(|| CoreError::InvalidAddress("missing name".into()))?;
        let root = EntryHash::from_hex(root_hex)
            .map_err(|e| CoreError::InvalidAddress(format!("root hash: {e}")))?;
        Self::new(root, name)
    }
}

fn validate_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::InvalidAddress("empty name".into()));
    }
    if name.chars().any(char::is_control) {
        return Err(CoreError::InvalidAddress(
            "name contains control characters".into(),
        ));
    }
    Ok(())
}

impl fmt::Display for LogAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", ADDRESS_PREFIX, self.root.to_hex(), self.name)
    }
}

impl FromStr for LogAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LogAddress {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<LogAddress> for String {
    fn from(address: LogAddress) -> Self {
        address.to_string()
    }
}
