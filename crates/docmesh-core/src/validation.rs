//! Entry validation: structure, content hash, signature and causal links.

use crate::canonical::{decode_operation, encode_operation};
use crate::causal::EntryLookup;
use crate::crypto::Blake3Hash;
use crate::entry::{Entry, OperationKind, ENTRY_VERSION, MAX_PREDECESSORS};
use crate::error::ValidationError;

/// Validate an entry in isolation (without log context).
///
/// This performs:
/// - Version check
/// - Predecessor shape (genesis has none, others at least one, sorted, bounded)
/// - Payload hash and payload/operation agreement
/// - Content hash
/// - Signature verification
pub fn validate_entry(entry: &Entry) -> Result<(), ValidationError> {
    let header = &entry.header;

    // 1. Version
    if header.version != ENTRY_VERSION {
        return Err(ValidationError::UnsupportedVersion(header.version));
    }

    // 2. Predecessor shape
    if header.predecessors.len() > MAX_PREDECESSORS {
        return Err(ValidationError::TooManyPredecessors(MAX_PREDECESSORS));
    }
    if header.predecessors.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ValidationError::UnsortedPredecessors);
    }
    match header.kind {
        OperationKind::Genesis if !header.predecessors.is_empty() => {
            return Err(ValidationError::GenesisWithPredecessors);
        }
        OperationKind::Genesis => {}
        _ if header.predecessors.is_empty() => {
            return Err(ValidationError::MissingPredecessors);
        }
        _ => {}
    }
    if !header.clock.in_range() {
        return Err(ValidationError::ClockOutOfRange(header.clock));
    }

    // 3. Payload
    if Blake3Hash::hash(&entry.payload) != header.payload_hash {
        return Err(ValidationError::PayloadHashMismatch);
    }
    // Compare bytes, not decoded values: the payload is what was signed.
    decode_operation(&entry.payload)?;
    if encode_operation(&entry.operation)? != entry.payload.as_ref() {
        return Err(ValidationError::StructuralError(
            "operation does not match payload".into(),
        ));
    }
    if header.kind != entry.operation.kind() {
        return Err(ValidationError::KindMismatch {
            header: header.kind.to_u16(),
            operation: entry.operation.kind().to_u16(),
        });
    }

    // 4. Content hash
    let computed = entry.compute_hash();
    if computed != entry.hash {
        return Err(ValidationError::HashMismatch {
            claimed: entry.hash,
            computed,
        });
    }

    // 5. Signature
    header
        .author
        .verify(&entry.signed_message(), &entry.signature)
        .map_err(|_| ValidationError::SignatureFailed)?;

    Ok(())
}

/// Validate an entry's links into the log it is joining.
///
/// Every predecessor must already be present, and the entry's clock must be
/// strictly greater than each predecessor's.
pub fn validate_causal_links<L: EntryLookup + ?Sized>(
    entry: &Entry,
    log: &L,
) -> Result<(), ValidationError> {
    for pred in entry.predecessors() {
        let parent = log
            .lookup_entry(pred)
            .ok_or(ValidationError::UnknownPredecessor(*pred))?;
        if parent.clock() >= entry.clock() {
            return Err(ValidationError::ClockNotAdvanced {
                clock: entry.clock(),
                predecessor: parent.clock(),
            });
        }
    }
    Ok(())
}
