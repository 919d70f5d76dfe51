//! Canonical CBOR encoding for deterministic serialization.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (document values travel as canonical JSON text inside a byte string)
//!
//! Entry wire format: `canonical_header || payload || signature(64)`.
//! Decoding re-encodes what it parsed and rejects any input that is not
//! byte-for-byte canonical, so one entry has exactly one hash.

use ciborium::value::{Integer, Value};

use crate::clock::LogicalClock;
use crate::crypto::{Blake3Hash, Ed25519Signature, PublicKeyId};
use crate::entry::{Entry, EntryHeader, Operation, OperationKind};
use crate::error::CoreError;
use crate::types::EntryHash;

/// Header field keys (integer keys for compact encoding).
mod header_keys {
    pub const VERSION: u64 = 0;
    pub const AUTHOR: u64 = 1;
    pub const CLOCK: u64 = 2;
    pub const PREDECESSORS: u64 = 3;
    pub const KIND: u64 = 4;
    pub const PAYLOAD_HASH: u64 = 5;
}

/// Payload field keys.
mod payload_keys {
    pub const KIND: u64 = 0;
    pub const KEY: u64 = 1;
    pub const VALUE: u64 = 2;
    pub const SUBJECT: u64 = 3;
    pub const NAME: u64 = 4;
    pub const WRITERS: u64 = 5;
}

const SIGNATURE_LEN: usize = 64;

/// Encode an entry header to canonical CBOR bytes.
pub fn canonical_header_bytes(header: &EntryHeader) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, &header_to_cbor_value(header));
    buf
}

/// Encode an entire entry to canonical bytes.
pub fn canonical_bytes(entry: &Entry) -> Vec<u8> {
    let mut buf = signed_message_from_parts(&entry.header, &entry.payload);
    buf.extend_from_slice(&entry.signature.0);
    buf
}

/// Construct the signed message from header and payload.
pub fn signed_message_from_parts(header: &EntryHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = canonical_header_bytes(header);
    buf.extend_from_slice(payload);
    buf
}

/// Encode an operation to its canonical payload bytes.
pub fn encode_operation(operation: &Operation) -> Result<Vec<u8>, CoreError> {
    let json;
    let mut fields = PayloadFields::new(operation.kind());

    match operation {
        Operation::Genesis { name, writers } => {
            fields.name = Some(name.as_str());
            fields.writers = Some(writers.clone());
        }
        Operation::Put { key, value } => {
            json = serde_json::to_vec(value).map_err(|e| CoreError::EncodingError(e.to_string()))?;
            fields.key = Some(key.as_str());
            fields.value = Some(json.as_slice());
        }
        Operation::Delete { key } => fields.key = Some(key.as_str()),
        Operation::Grant { key } | Operation::Revoke { key } => fields.subject = Some(*key),
    }

    let mut buf = Vec::new();
    encode_value_to(&mut buf, &fields.to_cbor_value());
    Ok(buf)
}

/// Decode an operation from canonical payload bytes.
pub fn decode_operation(payload: &[u8]) -> Result<Operation, CoreError> {
    let value: Value =
        ciborium::from_reader(payload).map_err(|e| CoreError::DecodingError(e.to_string()))?;

    let fields = PayloadFields::from_cbor_value(&value)?;

    let mut reencoded = Vec::with_capacity(payload.len());
    encode_value_to(&mut reencoded, &fields.to_cbor_value());
    if reencoded != payload {
        return Err(CoreError::NonCanonical("payload"));
    }

    fields.into_operation()
}

/// Decode an entry from canonical bytes.
pub fn decode_entry(bytes: &[u8]) -> Result<Entry, CoreError> {
    if bytes.len() < SIGNATURE_LEN {
        return Err(CoreError::MalformedEntry("too short".into()));
    }

    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;
    let header = cbor_value_to_header(&value)?;

    // Re-encoding locates the header boundary and proves it canonical.
    let header_bytes = canonical_header_bytes(&header);
    if !bytes.starts_with(&header_bytes) {
        return Err(CoreError::NonCanonical("header"));
    }

    let remaining = &bytes[header_bytes.len()..];
    if remaining.len() < SIGNATURE_LEN {
        return Err(CoreError::MalformedEntry(
            "insufficient bytes for signature".into(),
        ));
    }

    let payload_len = remaining.len() - SIGNATURE_LEN;
    let payload = &remaining[..payload_len];
    let sig_bytes: [u8; 64] = remaining[payload_len..]
        .try_into()
        .map_err(|_| CoreError::MalformedEntry("invalid signature length".into()))?;

    let operation = decode_operation(payload)?;

    Ok(Entry {
        hash: EntryHash(Blake3Hash::hash(bytes).0),
        header,
        operation,
        payload: payload.to_vec().into(),
        signature: Ed25519Signature(sig_bytes),
    })
}

fn key(k: u64) -> Value {
    Value::Integer(k.into())
}

fn header_to_cbor_value(header: &EntryHeader) -> Value {
    let predecessors = header
        .predecessors
        .iter()
        .map(|p| Value::Bytes(p.0.to_vec()))
        .collect();

    Value::Map(vec![
        (key(header_keys::VERSION), Value::Integer(header.version.into())),
        (key(header_keys::AUTHOR), Value::Bytes(header.author.0.to_vec())),
        (key(header_keys::CLOCK), Value::Integer(header.clock.0.into())),
        (key(header_keys::PREDECESSORS), Value::Array(predecessors)),
        (key(header_keys::KIND), Value::Integer(header.kind.to_u16().into())),
        (
            key(header_keys::PAYLOAD_HASH),
            Value::Bytes(header.payload_hash.0.to_vec()),
        ),
    ])
}

fn map_get(map: &[(Value, Value)], wanted: u64) -> Option<&Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Integer(i) if u64::try_from(*i).ok() == Some(wanted)))
        .map(|(_, v)| v)
}

fn as_u64(value: Option<&Value>) -> Option<u64> {
    match value {
        Some(Value::Integer(i)) => u64::try_from(*i).ok(),
        _ => None,
    }
}

fn as_array32(value: &Value) -> Option<[u8; 32]> {
    match value {
        Value::Bytes(b) => b.as_slice().try_into().ok(),
        _ => None,
    }
}

fn cbor_value_to_header(value: &Value) -> Result<EntryHeader, CoreError> {
    let map = match value {
        Value::Map(m) => m,
        _ => return Err(CoreError::MalformedEntry("expected header map".into())),
    };
    let malformed = |what: &str| CoreError::MalformedEntry(format!("invalid {what}"));

    let version = as_u64(map_get(map, header_keys::VERSION))
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| malformed("version"))?;

    let author = map_get(map, header_keys::AUTHOR)
        .and_then(as_array32)
        .map(PublicKeyId)
        .ok_or_else(|| malformed("author"))?;

    let clock = as_u64(map_get(map, header_keys::CLOCK))
        .map(LogicalClock)
        .ok_or_else(|| malformed("clock"))?;

    let predecessors = match map_get(map, header_keys::PREDECESSORS) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| as_array32(item).map(EntryHash))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| malformed("predecessor"))?,
        _ => return Err(malformed("predecessors")),
    };

    let kind = as_u64(map_get(map, header_keys::KIND))
        .and_then(|k| u16::try_from(k).ok())
        .and_then(OperationKind::from_u16)
        .ok_or_else(|| malformed("kind"))?;

    let payload_hash = map_get(map, header_keys::PAYLOAD_HASH)
        .and_then(as_array32)
        .map(Blake3Hash)
        .ok_or_else(|| malformed("payload_hash"))?;

    Ok(EntryHeader {
        version,
        author,
        clock,
        predecessors,
        kind,
        payload_hash,
    })
}

/// Flat view of a payload map; absent fields are omitted from the encoding.
struct PayloadFields<'a> {
    kind: OperationKind,
    key: Option<&'a str>,
    value: Option<&'a [u8]>,
    subject: Option<PublicKeyId>,
    name: Option<&'a str>,
    writers: Option<Vec<PublicKeyId>>,
}

impl<'a> PayloadFields<'a> {
    fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            key: None,
            value: None,
            subject: None,
            name: None,
            writers: None,
        }
    }

    fn to_cbor_value(&self) -> Value {
        let mut entries = vec![(
            key(payload_keys::KIND),
            Value::Integer(Integer::from(self.kind.to_u16())),
        )];
        if let Some(k) = self.key {
            entries.push((key(payload_keys::KEY), Value::Text(k.to_string())));
        }
        if let Some(v) = self.value {
            entries.push((key(payload_keys::VALUE), Value::Bytes(v.to_vec())));
        }
        if let Some(s) = &self.subject {
            entries.push((key(payload_keys::SUBJECT), Value::Bytes(s.0.to_vec())));
        }
        if let Some(n) = self.name {
            entries.push((key(payload_keys::NAME), Value::Text(n.to_string())));
        }
        if let Some(w) = &self.writers {
            let writers = w.iter().map(|pk| Value::Bytes(pk.0.to_vec())).collect();
            entries.push((key(payload_keys::WRITERS), Value::Array(writers)));
        }
        Value::Map(entries)
    }

    fn from_cbor_value(value: &'a Value) -> Result<Self, CoreError> {
        let map = match value {
            Value::Map(m) => m,
            _ => return Err(CoreError::MalformedPayload("expected payload map".into())),
        };
        let malformed = |what: &str| CoreError::MalformedPayload(format!("invalid {what}"));

        let kind = as_u64(map_get(map, payload_keys::KIND))
            .and_then(|k| u16::try_from(k).ok())
            .and_then(OperationKind::from_u16)
            .ok_or_else(|| malformed("kind"))?;

        let mut fields = Self::new(kind);

        fields.key = match map_get(map, payload_keys::KEY) {
            Some(Value::Text(t)) => Some(t.as_str()),
            None => None,
            Some(_) => return Err(malformed("key")),
        };
        fields.value = match map_get(map, payload_keys::VALUE) {
            Some(Value::Bytes(b)) => Some(b.as_slice()),
            None => None,
            Some(_) => return Err(malformed("value")),
        };
        fields.subject = match map_get(map, payload_keys::SUBJECT) {
            Some(v) => Some(as_array32(v).map(PublicKeyId).ok_or_else(|| malformed("subject"))?),
            None => None,
        };
        fields.name = match map_get(map, payload_keys::NAME) {
            Some(Value::Text(t)) => Some(t.as_str()),
            None => None,
            Some(_) => return Err(malformed("name")),
        };
        fields.writers = match map_get(map, payload_keys::WRITERS) {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| as_array32(item).map(PublicKeyId))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| malformed("writer"))?,
            ),
            None => None,
            Some(_) => return Err(malformed("writers")),
        };

        Ok(fields)
    }

    fn into_operation(self) -> Result<Operation, CoreError> {
        let unexpected = || {
            CoreError::MalformedPayload(format!(
                "fields do not match operation kind {:#06x}",
                self.kind.to_u16()
            ))
        };

        match (self.kind, self.key, self.value, self.subject, self.name, &self.writers) {
            (OperationKind::Genesis, None, None, None, Some(name), Some(writers)) => {
                if writers.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(CoreError::NonCanonical("genesis writers"));
                }
                Ok(Operation::Genesis {
                    name: name.to_string(),
                    writers: writers.clone(),
                })
            }
            (OperationKind::Put, Some(key), Some(json), None, None, None) => {
                let value = serde_json::from_slice(json)
                    .map_err(|e| CoreError::MalformedPayload(format!("document value: {e}")))?;
                Ok(Operation::Put {
                    key: key.to_string(),
                    value,
                })
            }
            (OperationKind::Delete, Some(key), None, None, None, None) => Ok(Operation::Delete {
                key: key.to_string(),
            }),
            (OperationKind::Grant, None, None, Some(key), None, None) => Ok(Operation::Grant { key }),
            (OperationKind::Revoke, None, None, Some(key), None, None) => Ok(Operation::Revoke { key }),
            _ => Err(unexpected()),
        }
    }
}

/// Recursively encode a CBOR value.
///
/// Only the value shapes built in this module reach the encoder.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item);
            }
        }
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        other => panic!("unsupported CBOR value in canonical encoding: {other:?}"),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: Integer) {
    let n = i128::from(i);
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a map canonically (major type 5), keys sorted by encoded bytes.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::entry::EntryBuilder;
    use serde_json::json;

    fn sample_entry() -> Entry {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        EntryBuilder::new(Operation::put("doc-1", json!({"status": "ok", "n": 3})))
            .clock(LogicalClock(2))
            .predecessors([EntryHash([0x11; 32])])
            .sign(&keypair)
            .unwrap()
    }

    #[test]
    fn test_integer_encoding() {
        let mut buf = Vec::new();
        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, vec![0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, vec![0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 256);
        assert_eq!(buf, vec![0x19, 0x01, 0x00]);

        buf.clear();
        encode_uint(&mut buf, 0, 0x1_0000_0000);
        assert_eq!(buf[0], 0x1b);
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn test_map_key_ordering() {
        let mut buf = Vec::new();
        let entries = vec![
            (key(5), Value::Integer(50.into())),
            (key(0), Value::Integer(0.into())),
        ];
        encode_map_canonical(&mut buf, &entries);
        assert_eq!(buf, vec![0xa2, 0x00, 0x00, 0x05, 0x18, 50]);
    }

    #[test]
    fn test_entry_roundtrip() {
        let entry = sample_entry();
        let decoded = decode_entry(&canonical_bytes(&entry)).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_every_operation_kind_decodes() {
        let keypair = Keypair::from_seed(&[0x01; 32]);
        let other = Keypair::from_seed(&[0x02; 32]).public_key();
        for op in [
            Operation::genesis("test", [keypair.public_key()]),
            Operation::delete("gone"),
            Operation::Grant { key: other },
            Operation::Revoke { key: other },
        ] {
            let payload = encode_operation(&op).unwrap();
            assert_eq!(decode_operation(&payload).unwrap(), op);
        }
    }

    #[test]
    fn test_json_object_keys_are_sorted() {
        let a = encode_operation(&Operation::put("k", json!({"b": 1, "a": 2}))).unwrap();
        let b = encode_operation(&Operation::put("k", json!({"a": 2, "b": 1}))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_covers_wire_bytes() {
        let entry = sample_entry();
        let bytes = canonical_bytes(&entry);
        assert_eq!(entry.hash, EntryHash(Blake3Hash::hash(&bytes).0));
    }

    #[test]
    fn test_truncated_entry_rejected() {
        let bytes = canonical_bytes(&sample_entry());
        assert!(decode_entry(&bytes[..40]).is_err());
        assert!(decode_entry(&bytes[..bytes.len() - 70]).is_err());
    }

    #[test]
    fn test_non_canonical_payload_rejected() {
        // Same fields, map keys in descending order.
        let mut buf = Vec::new();
        buf.push(0xa2);
        encode_uint(&mut buf, 0, payload_keys::KEY);
        encode_uint(&mut buf, 3, 1);
        buf.push(b'k');
        encode_uint(&mut buf, 0, payload_keys::KIND);
        encode_uint(&mut buf, 0, OperationKind::Delete.to_u16() as u64);

        assert!(matches!(
            decode_operation(&buf),
            Err(CoreError::NonCanonical("payload"))
        ));
    }

    #[test]
    fn test_payload_with_foreign_fields_rejected() {
        let fields = PayloadFields {
            name: Some("extra"),
            key: Some("k"),
            ..PayloadFields::new(OperationKind::Delete)
        };
        let mut buf = Vec::new();
        encode_value_to(&mut buf, &fields.to_cbor_value());
        assert!(matches!(
            decode_operation(&buf),
            Err(CoreError::MalformedPayload(_))
        ));
    }
}
