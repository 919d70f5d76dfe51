//! Error types for docmesh core.

use thiserror::Error;

use crate::clock::LogicalClock;
use crate::types::EntryHash;

/// Core errors that can occur while building, encoding or decoding entries.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("unsupported entry version: {0}")]
    UnsupportedVersion(u8),

    #[error("malformed entry: {0}")]
    MalformedEntry(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("non-canonical encoding: {0}")]
    NonCanonical(&'static str),

    #[error("invalid log address: {0}")]
    InvalidAddress(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Validation errors for entry structure, signatures and causal links.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("signature verification failed")]
    SignatureFailed,

    #[error("payload hash does not match header")]
    PayloadHashMismatch,

    #[error("entry hash does not match content: claimed {claimed}, computed {computed}")]
    HashMismatch {
        claimed: EntryHash,
        computed: EntryHash,
    },

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("header kind {header:#06x} does not match operation kind {operation:#06x}")]
    KindMismatch { header: u16, operation: u16 },

    #[error("genesis entry must not have predecessors")]
    GenesisWithPredecessors,

    #[error("non-genesis entry must have at least one predecessor")]
    MissingPredecessors,

    #[error("predecessors must be sorted and unique")]
    UnsortedPredecessors,

    #[error("predecessor list exceeds maximum length of {0}")]
    TooManyPredecessors(usize),

    #[error("predecessor {0} is not present in the log")]
    UnknownPredecessor(EntryHash),

    #[error("clock {clock} does not advance past predecessor clock {predecessor}")]
    ClockNotAdvanced {
        clock: LogicalClock,
        predecessor: LogicalClock,
    },

    #[error("clock {0} is outside the valid range")]
    ClockOutOfRange(LogicalClock),

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::SignatureFailed
            }
            CoreError::UnsupportedVersion(v) => ValidationError::UnsupportedVersion(v),
            CoreError::NonCanonical(msg) => ValidationError::StructuralError(msg.to_string()),
            CoreError::MalformedEntry(msg)
            | CoreError::MalformedPayload(msg)
            | CoreError::InvalidAddress(msg)
            | CoreError::EncodingError(msg)
            | CoreError::DecodingError(msg) => ValidationError::StructuralError(msg),
        }
    }
}
