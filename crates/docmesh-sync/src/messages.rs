//! Wire messages exchanged over a log transport.
//!
//! Entries travel in their canonical wire form (`header || payload ||
//! signature`); the receiving side re-decodes and recomputes every hash, so
//! nothing a peer claims about an entry is trusted.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use docmesh_core::{canonical_bytes, decode_entry, Entry, LogAddress};

use crate::error::{Result, SyncError};

/// Unique identifier for a node on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random node ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Message size limits.
pub mod limits {
    /// Max encoded size of one entry.
    pub const MAX_ENTRY_BYTES: usize = 1024 * 1024;
    /// Max entries in one snapshot.
    pub const MAX_SNAPSHOT_ENTRIES: usize = 100_000;
}

/// Messages carried by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// A single entry appended to a log.
    Published {
        address: LogAddress,
        entry: Bytes,
    },

    /// Everything a node knows about a log, in no particular order.
    Snapshot {
        address: LogAddress,
        entries: Vec<Bytes>,
    },
}

impl SyncMessage {
    /// Wrap an entry for publication.
    pub fn published(address: &LogAddress, entry: &Entry) -> Self {
        SyncMessage::Published {
            address: address.clone(),
            entry: Bytes::from(canonical_bytes(entry)),
        }
    }

    pub fn address(&self) -> &LogAddress {
        match self {
            SyncMessage::Published { address, .. } | SyncMessage::Snapshot { address, .. } => {
                address
            }
        }
    }

    /// Raw entry encodings carried by the message.
    pub fn raw_entries(&self) -> &[Bytes] {
        match self {
            SyncMessage::Published { entry, .. } => std::slice::from_ref(entry),
            SyncMessage::Snapshot { entries, .. } => entries,
        }
    }

    /// Decode every carried entry. Malformed encodings are returned as errors
    /// in place so the caller can skip them.
    pub fn decode_entries(&self) -> Vec<Result<Entry>> {
        self.raw_entries()
            .iter()
            .map(|raw| decode_entry(raw).map_err(|e| SyncError::Decode(e.to_string())))
            .collect()
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        if let SyncMessage::Snapshot { entries, .. } = self {
            if entries.len() > limits::MAX_SNAPSHOT_ENTRIES {
                return Err("too many entries in snapshot");
            }
        }
        if self
            .raw_entries()
            .iter()
            .any(|raw| raw.len() > limits::MAX_ENTRY_BYTES)
        {
            return Err("entry exceeds size limit");
        }
        Ok(())
    }
}

/// A message plus routing metadata, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub protocol_version: u8,
    pub from: NodeId,
    pub message: SyncMessage,
}

impl Envelope {
    pub fn new(from: NodeId, message: SyncMessage) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            from,
            message,
        }
    }

    /// Encode as CBOR.
    pub fn encode(&self) -> Result<Bytes> {
        self.message
            .validate_limits()
            .map_err(|e| SyncError::InvalidMessage(e.into()))?;
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| SyncError::Encode(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    /// Decode from CBOR, rejecting other protocol versions and oversize
    /// messages.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope =
            ciborium::from_reader(bytes).map_err(|e| SyncError::Decode(e.to_string()))?;
        if envelope.protocol_version != PROTOCOL_VERSION {
            return Err(SyncError::VersionMismatch {
                local: PROTOCOL_VERSION,
                peer: envelope.protocol_version,
            });
        }
        envelope
            .message
            .validate_limits()
            .map_err(|e| SyncError::InvalidMessage(e.into()))?;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmesh_core::{EntryBuilder, Keypair, Operation};

    fn genesis() -> (Entry, LogAddress) {
        let keypair = Keypair::from_seed(&[3; 32]);
        let entry = EntryBuilder::new(Operation::genesis("notes", [keypair.public_key()]))
            .sign(&keypair)
            .unwrap();
        let address = LogAddress::derive(&entry, "notes").unwrap();
        (entry, address)
    }

    #[test]
    fn test_envelope_wire_form() {
        let (entry, address) = genesis();
        let envelope = Envelope::new(NodeId::from_bytes([0xAA; 32]), SyncMessage::published(&address, &entry));

        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.message.address(), &address);

        let entries = decoded.message.decode_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].as_ref().unwrap(), &entry);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let (entry, address) = genesis();
        let mut envelope = Envelope::new(NodeId::random(), SyncMessage::published(&address, &entry));
        envelope.protocol_version = PROTOCOL_VERSION + 1;

        let mut buf = Vec::new();
        ciborium::into_writer(&envelope, &mut buf).unwrap();
        assert!(matches!(
            Envelope::decode(&buf),
            Err(SyncError::VersionMismatch { peer, .. }) if peer == PROTOCOL_VERSION + 1
        ));
    }

    #[test]
    fn test_malformed_entry_reported_in_place() {
        let (entry, address) = genesis();
        let message = SyncMessage::Snapshot {
            address,
            entries: vec![
                Bytes::from_static(b"garbage"),
                Bytes::from(canonical_bytes(&entry)),
            ],
        };

        let decoded = message.decode_entries();
        assert!(matches!(decoded[0], Err(SyncError::Decode(_))));
        assert_eq!(decoded[1].as_ref().unwrap().hash, entry.hash);
    }

    #[test]
    fn test_oversize_entry_rejected() {
        let (_, address) = genesis();
        let message = SyncMessage::Published {
            address,
            entry: Bytes::from(vec![0u8; limits::MAX_ENTRY_BYTES + 1]),
        };
        assert!(message.validate_limits().is_err());
        assert!(matches!(
            Envelope::new(NodeId::random(), message).encode(),
            Err(SyncError::InvalidMessage(_))
        ));
    }
}
