//! # docmesh store
//!
//! Storage abstraction for docmesh. Two collaborators live here:
//!
//! - [`EntryStore`] - durable, content-addressed log entries, scoped per log
//! - [`DocumentStore`] - the key → document store the materialized view is
//!   written through to
//!
//! Both are implemented by [`SqliteStore`] (persistent) and [`MemoryStore`]
//! (tests and ephemeral replicas).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docmesh_store::{DocumentStore, SqliteStore};
//!
//! async fn example() -> docmesh_store::Result<()> {
//!     let store = SqliteStore::open("replica.db")?;
//!     store.put("doc-1", &serde_json::json!({"status": "ok"})).await?;
//!     assert_eq!(store.all_entries().await?.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: inserting the same entry twice into a log
//!   returns `AlreadyExists`
//! - **Shared blocks**: entries are stored once by hash and linked to each
//!   log that contains them
//! - **Ordered listing**: log entries list by `(clock, hash)`, which is a
//!   valid causal order for validated entries

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{DocumentStore, DocumentStoreExt, EntryStore, EntryStoreExt, InsertResult};
