//! The collaborators an engine is built from.

use std::sync::Arc;

use docmesh_core::Identity;
use docmesh_store::{DocumentStore, EntryStore, MemoryStore};
use docmesh_sync::LogTransport;

/// Handles to the document store, entry store, transport and signing
/// identity of one engine.
///
/// Cloning is cheap; engines built from clones of one context share the
/// same stores and network.
#[derive(Clone)]
pub struct EngineContext {
    pub documents: Arc<dyn DocumentStore>,
    pub entries: Arc<dyn EntryStore>,
    pub transport: Arc<dyn LogTransport>,
    pub identity: Arc<dyn Identity>,
}

impl EngineContext {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        entries: Arc<dyn EntryStore>,
        transport: Arc<dyn LogTransport>,
        identity: Arc<dyn Identity>,
    ) -> Self {
        Self {
            documents,
            entries,
            transport,
            identity,
        }
    }

    /// A context whose documents and entries live in one fresh
    /// [`MemoryStore`].
    pub fn in_memory(transport: Arc<dyn LogTransport>, identity: Arc<dyn Identity>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, transport, identity)
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("identity", &self.identity.public_key())
            .field("node", &self.transport.local_node_id())
            .finish_non_exhaustive()
    }
}
