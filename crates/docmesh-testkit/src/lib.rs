//! # docmesh testkit
//!
//! Testing utilities for docmesh.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known entries with expected hashes for cross-platform verification
//! - **Generators**: Proptest strategies, including random multi-writer histories
//! - **Fixtures**: Hand-built logs and engines sharing an in-memory network
//!
//! ## Golden Vectors
//!
//! ```rust
//! use docmesh_testkit::vectors::{all_vectors, generate_entry_from_vector};
//!
//! for vector in all_vectors() {
//!     let entry = generate_entry_from_vector(&vector);
//!     println!("{}: {}", vector.name, entry.hash.to_hex());
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use docmesh_testkit::generators::{history_from_params, HistoryParams};
//!
//! proptest! {
//!     #[test]
//!     fn history_is_causal(params: HistoryParams) {
//!         let history = history_from_params(&params);
//!         prop_assert!(history.entries()[0].is_genesis());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use docmesh_testkit::fixtures::LogFixture;
//! use docmesh_core::Operation;
//! use serde_json::json;
//!
//! let mut log = LogFixture::with_seed([7; 32], "notes");
//! let owner = log.owner.clone();
//! log.append_head(&owner, Operation::put("a", json!(1)));
//! assert_eq!(log.entries().len(), 2);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{multi_party_keys, Cluster, LogFixture};
pub use generators::{history_from_params, History, HistoryParams, STRANGER_MARK};
pub use vectors::{all_vectors, generate_entry_from_vector, verify_all_vectors, GoldenVector};
