//! # docmesh core
//!
//! Pure primitives for docmesh: signed log entries, log addresses, causal
//! ordering and the document materializer.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`Entry`] - A signed, content-addressed operation in a log
//! - [`EntryHash`] - Content-addressed identifier (Blake3 hash)
//! - [`LogAddress`] - External handle of a log: genesis hash plus a name
//! - [`EntryArena`] / [`Frontier`] - The causal graph and its tips
//! - [`DocumentView`] - Deterministic last-writer-wins fold of a log
//!
//! ## Canonicalization
//!
//! All entries are encoded using deterministic CBOR. See [`canonical`] module.

pub mod address;
pub mod canonical;
pub mod causal;
pub mod clock;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod materialize;
pub mod types;
pub mod validation;

pub use address::LogAddress;
pub use canonical::{canonical_bytes, canonical_header_bytes, decode_entry, decode_operation, encode_operation};
pub use causal::{ancestor_closure, causal_sort, EntryArena, EntryLookup, Frontier};
pub use clock::LogicalClock;
pub use crypto::{Blake3Hash, Ed25519Signature, Identity, Keypair, PublicKeyId};
pub use entry::{Entry, EntryBuilder, EntryHeader, Operation, OperationKind};
pub use error::{CoreError, ValidationError};
pub use materialize::{Change, DocumentView, Stamp};
pub use types::EntryHash;
pub use validation::{validate_causal_links, validate_entry};
