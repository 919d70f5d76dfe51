//! # docmesh
//!
//! A sync and merge engine that keeps a local document store in step with a
//! distributed, content-addressed operation log.
//!
//! ## Overview
//!
//! docmesh provides an offline-first library for:
//!
//! - **Logs**: Append-only DAGs of signed entries, addressed by their genesis
//! - **Documents**: A key → JSON view materialized from the log
//! - **Access control**: Writer keys declared at genesis, changed by grant/revoke entries
//! - **Merge**: Combining divergent replicas, or whole logs, without a coordinator
//!
//! ## Key Concepts
//!
//! - **Entry**: Immutable. Identified by the hash of its content.
//! - **Frontier**: The latest entries; new entries name them as predecessors.
//! - **Last writer wins**: The causally latest write to a key is visible,
//!   ties broken by `(clock, hash)`.
//! - **Partial merge**: Invalid entries are dropped and counted, never fatal.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docmesh::{EngineConfig, EngineContext, SyncEngine};
//! use docmesh::core::Keypair;
//! use docmesh::sync::{MemoryNetwork, NodeId};
//!
//! async fn example() -> docmesh::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let transport = Arc::new(network.create_transport(NodeId::random()).await);
//!     let context = EngineContext::in_memory(transport, Arc::new(Keypair::generate()));
//!
//!     let engine = SyncEngine::new(context, EngineConfig::default());
//!     let handle = engine.create("notes").await?;
//!     engine.put("greeting", serde_json::json!({ "status": "ok" })).await?;
//!
//!     // Another replica: engine.load(&handle.address) then merge.
//!     println!("log at {}", handle.address);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `docmesh::core` - Entries, addresses, causal ordering, materializer
//! - `docmesh::store` - Entry and document stores, SQLite
//! - `docmesh::sync` - Transport, wire messages, convergence digests
//! - `docmesh::perms` - Access policies

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod log;

// Re-export component crates
pub use docmesh_core as core;
pub use docmesh_perms as perms;
pub use docmesh_store as store;
pub use docmesh_sync as sync;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use context::EngineContext;
pub use engine::{LogHandle, LogState, MergeReport, MergeSource, SyncEngine};
pub use error::{EngineError, Result};
pub use events::{WriteEvent, WriteObserver, WriteOrigin};
pub use log::{EntryLog, MergePlan};

// Re-export commonly used core types
pub use docmesh_core::{
    DocumentView, Entry, EntryHash, Frontier, Identity, Keypair, LogAddress, Operation,
    PublicKeyId,
};
