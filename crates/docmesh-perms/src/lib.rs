//! # docmesh permissions
//!
//! Key-based write authorization, expressed as log entries.
//!
//! ## Overview
//!
//! Instead of a mutable access list, the writers of a log are recorded in
//! the log itself: the genesis entry declares the initial writers, and
//! `Grant` / `Revoke` entries change the set afterwards. The policy that
//! applies to an entry is the fold of those operations over the entry's
//! causal ancestors, so an entry's validity never depends on what arrived
//! after it.
//!
//! ## Key Types
//!
//! - [`AccessPolicy`] - The set of keys allowed to append
//! - [`is_authorized`] - Pure predicate: entry + policy at its predecessors
//! - [`AccessController`] - Resolves policies over a log and caches verdicts
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docmesh_core::{EntryArena, EntryBuilder, Keypair, Operation};
//! use docmesh_perms::AccessController;
//!
//! let owner = Keypair::generate();
//! let genesis = EntryBuilder::new(Operation::genesis("notes", [owner.public_key()]))
//!     .sign(&owner)
//!     .unwrap();
//!
//! let mut arena = EntryArena::new();
//! let mut controller = AccessController::new();
//! assert!(controller.check(&genesis, &arena));
//! arena.insert(genesis);
//! ```

pub mod controller;
pub mod error;
pub mod policy;

pub use controller::{is_authorized, AccessController};
pub use error::{PermsError, Result};
pub use policy::AccessPolicy;
