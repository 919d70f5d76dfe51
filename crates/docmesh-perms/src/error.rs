//! Error types for the permissions module.

use docmesh_core::{EntryHash, PublicKeyId};
use thiserror::Error;

/// Errors that can occur during permission checks.
#[derive(Debug, Error)]
pub enum PermsError {
    /// The entry's author is not in the policy resolved at its predecessors.
    #[error("author {author} is not authorized to append entry {entry}")]
    Unauthorized { author: PublicKeyId, entry: EntryHash },

    /// A genesis entry does not authorize its own author.
    #[error("genesis entry {0} does not list its author as a writer")]
    InvalidGenesis(EntryHash),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
