//! Error types for the sync engine.

use std::time::Duration;

use docmesh_core::{CoreError, EntryHash, LogAddress, PublicKeyId, ValidationError};
use docmesh_perms::PermsError;
use docmesh_store::StoreError;
use docmesh_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation attempted before a log was created or loaded.
    #[error("no log loaded")]
    NotLoaded,

    /// The engine is already attached to a log.
    #[error("already attached to {0}")]
    AlreadyAttached(LogAddress),

    /// The local key may not write under the current policy.
    #[error("key {author} is not authorized to write")]
    Unauthorized { author: PublicKeyId },

    /// A log's genesis does not authorize itself.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A freshly signed entry did not verify.
    #[error("signature error: {0}")]
    SignatureError(String),

    /// Entry not found.
    #[error("entry not found: {0}")]
    NotFound(EntryHash),

    /// No genesis entry matching the address could be retrieved.
    #[error("address not found: {0}")]
    AddressNotFound(LogAddress),

    /// The other log cannot be combined with this one.
    #[error("incompatible log: {0}")]
    IncompatibleLog(String),

    /// Invalid operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A fetch did not complete in time.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Encoding or address error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] SyncError),

    /// Permission error.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
