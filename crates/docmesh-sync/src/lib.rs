//! # docmesh sync
//!
//! Moves log entries between replicas.
//!
//! ## Overview
//!
//! Replicas share a log by publishing each new entry on the log's topic and
//! fetching the full retained set when they load or merge. The transport is
//! untrusted: delivery is unordered, may repeat and may lose entries. Every
//! received entry is re-decoded from its canonical wire form and validated
//! by the receiver before it is used.
//!
//! ## Key Properties
//!
//! - **Idempotent**: Re-delivering an entry changes nothing
//! - **Commutative**: Delivery order doesn't affect final state
//! - **Verifiable**: Replicas compare [`ReplicaDigest`]s to confirm convergence
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docmesh_sync::{LogTransport, MemoryNetwork, NodeId};
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let transport = network.create_transport(NodeId::random()).await;
//!     // transport.publish(&address, &entry).await?;
//!     // let entries = transport.fetch_all(&address).await?;
//! }
//! ```

pub mod convergence;
pub mod error;
pub mod messages;
pub mod transport;

pub use convergence::{frontier_hash, verify_convergence, view_hash, ConvergenceResult, ReplicaDigest};
pub use error::{Result, SyncError};
pub use messages::{limits, Envelope, NodeId, SyncMessage, PROTOCOL_VERSION};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, LogTransport, Subscription};
