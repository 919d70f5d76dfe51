//! Entry: a signed operation in a content-addressed causal log.
//!
//! An entry is immutable once built. Its identity is the Blake3 hash of its
//! canonical bytes, and it references its causal predecessors by that hash.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_bytes, encode_operation, signed_message_from_parts};
use crate::clock::LogicalClock;
use crate::crypto::{Blake3Hash, Ed25519Signature, Identity, PublicKeyId};
use crate::error::CoreError;
use crate::types::EntryHash;

/// The current entry schema version.
pub const ENTRY_VERSION: u8 = 0;

/// Maximum number of predecessors an entry may reference.
pub const MAX_PREDECESSORS: usize = 64;

/// Discriminator for the operation carried in an entry's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum OperationKind {
    // Log lifecycle (0x0000 - 0x000F)
    /// First entry of a log.
    Genesis = 0x0001,

    // Document kinds (0x0010 - 0x00FF)
    /// Overwrite a document.
    Put = 0x0010,
    /// Remove a document.
    Delete = 0x0011,

    // Policy kinds (0x0100 - 0x01FF)
    /// Authorize a writer key.
    Grant = 0x0100,
    /// Deauthorize a writer key.
    Revoke = 0x0101,
}

impl OperationKind {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Genesis),
            0x0010 => Some(Self::Put),
            0x0011 => Some(Self::Delete),
            0x0100 => Some(Self::Grant),
            0x0101 => Some(Self::Revoke),
            _ => None,
        }
    }

    /// Check if this kind changes the document view.
    pub fn is_document(self) -> bool {
        matches!(self, Self::Put | Self::Delete)
    }

    /// Check if this kind changes the access policy.
    pub fn is_policy(self) -> bool {
        matches!(self, Self::Genesis | Self::Grant | Self::Revoke)
    }
}

/// The operation an entry records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Opens a log: its logical name and the initial writer set.
    Genesis {
        name: String,
        writers: Vec<PublicKeyId>,
    },
    /// Overwrite the document stored under `key`.
    Put {
        key: String,
        value: serde_json::Value,
    },
    /// Remove the document stored under `key`.
    Delete { key: String },
    /// Add `key` to the authorized writers.
    Grant { key: PublicKeyId },
    /// Remove `key` from the authorized writers.
    Revoke { key: PublicKeyId },
}

impl Operation {
    /// Build a genesis operation. Writers are normalized to a sorted set.
    pub fn genesis(name: impl Into<String>, writers: impl IntoIterator<Item = PublicKeyId>) -> Self {
        let mut writers: Vec<PublicKeyId> = writers.into_iter().collect();
        writers.sort();
        writers.dedup();
        Operation::Genesis {
            name: name.into(),
            writers,
        }
    }

    pub fn put(key: impl Into<String>, value: serde_json::Value) -> Self {
        Operation::Put {
            key: key.into(),
            value,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Operation::Delete { key: key.into() }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Genesis { .. } => OperationKind::Genesis,
            Operation::Put { .. } => OperationKind::Put,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::Grant { .. } => OperationKind::Grant,
            Operation::Revoke { .. } => OperationKind::Revoke,
        }
    }

    /// The document key this operation touches, if any.
    pub fn document_key(&self) -> Option<&str> {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => Some(key),
            _ => None,
        }
    }
}

/// The header of an entry, containing all metadata covered by the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    /// Schema version (currently 0).
    pub version: u8,

    /// The author's public key.
    pub author: PublicKeyId,

    /// Logical clock, strictly greater than every predecessor's.
    pub clock: LogicalClock,

    /// Causal predecessors, sorted ascending and unique.
    pub predecessors: Vec<EntryHash>,

    /// Kind of the operation in the payload.
    pub kind: OperationKind,

    /// Blake3 hash of the payload bytes.
    pub payload_hash: Blake3Hash,
}

/// A complete entry: header, payload, signature and derived hash.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Content hash over `canonical_header || payload || signature`.
    pub hash: EntryHash,

    pub header: EntryHeader,

    /// Decoded form of `payload`.
    pub operation: Operation,

    /// Canonical CBOR encoding of `operation`.
    pub payload: Bytes,

    /// Ed25519 signature over `canonical_header || payload`.
    pub signature: Ed25519Signature,
}

impl Entry {
    /// Recompute the content hash from the entry's fields.
    pub fn compute_hash(&self) -> EntryHash {
        EntryHash(Blake3Hash::hash(&canonical_bytes(self)).0)
    }

    /// Check that the stored hash matches the content.
    pub fn verify_hash(&self) -> bool {
        self.compute_hash() == self.hash
    }

    /// The bytes the signature covers.
    pub fn signed_message(&self) -> Vec<u8> {
        signed_message_from_parts(&self.header, &self.payload)
    }

    pub fn author(&self) -> &PublicKeyId {
        &self.header.author
    }

    pub fn clock(&self) -> LogicalClock {
        self.header.clock
    }

    pub fn predecessors(&self) -> &[EntryHash] {
        &self.header.predecessors
    }

    pub fn kind(&self) -> OperationKind {
        self.header.kind
    }

    pub fn is_genesis(&self) -> bool {
        self.header.kind == OperationKind::Genesis
    }

    /// The `(clock, hash)` pair that totally orders entries.
    pub fn order_key(&self) -> (LogicalClock, EntryHash) {
        (self.header.clock, self.hash)
    }
}

/// Builder for creating signed entries.
pub struct EntryBuilder {
    operation: Operation,
    clock: LogicalClock,
    predecessors: Vec<EntryHash>,
}

impl EntryBuilder {
    /// Start building an entry for the given operation.
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            clock: LogicalClock::GENESIS,
            predecessors: Vec::new(),
        }
    }

    /// Set the logical clock.
    pub fn clock(mut self, clock: LogicalClock) -> Self {
        self.clock = clock;
        self
    }

    /// Set the causal predecessors. They are sorted and deduplicated.
    pub fn predecessors(mut self, predecessors: impl IntoIterator<Item = EntryHash>) -> Self {
        let mut preds: Vec<EntryHash> = predecessors.into_iter().collect();
        preds.sort();
        preds.dedup();
        self.predecessors = preds;
        self
    }

    /// Encode, sign and hash the entry.
    ///
    /// The signature is not verified here; callers that accept foreign
    /// signers check it with [`crate::validate_entry`].
    pub fn sign<I: Identity + ?Sized>(self, identity: &I) -> Result<Entry, CoreError> {
        let payload = Bytes::from(encode_operation(&self.operation)?);

        let header = EntryHeader {
            version: ENTRY_VERSION,
            author: identity.public_key(),
            clock: self.clock,
            predecessors: self.predecessors,
            kind: self.operation.kind(),
            payload_hash: Blake3Hash::hash(&payload),
        };

        let signature = identity.sign(&signed_message_from_parts(&header, &payload));

        let mut entry = Entry {
            hash: EntryHash::ZERO,
            header,
            operation: self.operation,
            payload,
            signature,
        };
        entry.hash = entry.compute_hash();
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use serde_json::json;

    #[test]
    fn test_operation_kind_roundtrip() {
        for kind in [
            OperationKind::Genesis,
            OperationKind::Put,
            OperationKind::Delete,
            OperationKind::Grant,
            OperationKind::Revoke,
        ] {
            assert_eq!(OperationKind::from_u16(kind.to_u16()), Some(kind));
        }
        assert_eq!(OperationKind::from_u16(0x0002), None);
    }

    #[test]
    fn test_operation_kind_categories() {
        assert!(OperationKind::Put.is_document());
        assert!(OperationKind::Delete.is_document());
        assert!(!OperationKind::Grant.is_document());

        assert!(OperationKind::Genesis.is_policy());
        assert!(OperationKind::Revoke.is_policy());
        assert!(!OperationKind::Put.is_policy());
    }

    #[test]
    fn test_genesis_normalizes_writers() {
        let a = PublicKeyId([2; 32]);
        let b = PublicKeyId([1; 32]);
        let op = Operation::genesis("test", [a, b, a]);
        match op {
            Operation::Genesis { writers, .. } => assert_eq!(writers, vec![b, a]),
            other => panic!("unexpected operation {other:?}"),
        }
    }

    #[test]
    fn test_builder_sorts_predecessors() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let p1 = EntryHash([9; 32]);
        let p2 = EntryHash([3; 32]);

        let entry = EntryBuilder::new(Operation::delete("k"))
            .clock(LogicalClock(4))
            .predecessors([p1, p2, p1])
            .sign(&keypair)
            .unwrap();

        assert_eq!(entry.predecessors(), &[p2, p1]);
        assert_eq!(entry.kind(), OperationKind::Delete);
        assert_eq!(entry.clock(), LogicalClock(4));
        assert_eq!(entry.author(), &keypair.public_key());
    }

    #[test]
    fn test_entry_hash_deterministic() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let build = || {
            EntryBuilder::new(Operation::put("doc", json!({"status": "ok"})))
                .clock(LogicalClock(2))
                .predecessors([EntryHash([1; 32])])
                .sign(&keypair)
                .unwrap()
        };

        let e1 = build();
        let e2 = build();
        assert_eq!(e1.hash, e2.hash);
        assert!(e1.verify_hash());
    }

    #[test]
    fn test_hash_changes_with_content() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let e1 = EntryBuilder::new(Operation::put("doc", json!(1)))
            .sign(&keypair)
            .unwrap();
        let e2 = EntryBuilder::new(Operation::put("doc", json!(2)))
            .sign(&keypair)
            .unwrap();
        assert_ne!(e1.hash, e2.hash);
    }

    #[test]
    fn test_tampered_entry_fails_hash_check() {
        let keypair = Keypair::generate();
        let mut entry = EntryBuilder::new(Operation::delete("k"))
            .sign(&keypair)
            .unwrap();
        entry.header.clock = LogicalClock(99);
        assert!(!entry.verify_hash());
    }

    #[test]
    fn test_document_key() {
        assert_eq!(Operation::put("a", json!(null)).document_key(), Some("a"));
        assert_eq!(Operation::delete("b").document_key(), Some("b"));
        assert_eq!(
            Operation::Grant {
                key: PublicKeyId([0; 32])
            }
            .document_key(),
            None
        );
    }
}
