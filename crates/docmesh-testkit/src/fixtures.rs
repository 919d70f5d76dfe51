//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: hand-built logs for exercising
//! the pure layers, and engines wired to a shared in-memory network.

use std::sync::Arc;

use docmesh::{EngineConfig, EngineContext, SyncEngine};
use docmesh_core::{
    Entry, EntryArena, EntryBuilder, EntryHash, Keypair, LogAddress, LogicalClock, Operation,
    PublicKeyId,
};
use docmesh_store::MemoryStore;
use docmesh_sync::{LogTransport, MemoryNetwork, NodeId};

/// A log built by hand, entry by entry, without an engine.
pub struct LogFixture {
    pub owner: Keypair,
    pub genesis: Entry,
    pub address: LogAddress,
    arena: EntryArena,
}

impl LogFixture {
    /// Start a log owned by `owner` with extra `writers`.
    pub fn new(owner: Keypair, name: &str, writers: impl IntoIterator<Item = PublicKeyId>) -> Self {
        let all = std::iter::once(owner.public_key()).chain(writers);
        let genesis = EntryBuilder::new(Operation::genesis(name, all))
            .sign(&owner)
            .expect("genesis signs");
        let address = LogAddress::derive(&genesis, name).expect("name is valid");
        let mut arena = EntryArena::new();
        arena.insert(genesis.clone());
        Self {
            owner,
            genesis,
            address,
            arena,
        }
    }

    /// Create with a deterministic owner from seed.
    pub fn with_seed(seed: [u8; 32], name: &str) -> Self {
        Self::new(Keypair::from_seed(&seed), name, [])
    }

    /// Sign `operation` as `author` on top of `parents`, with the smallest
    /// valid clock, and add it to the fixture.
    pub fn append(&mut self, author: &Keypair, operation: Operation, parents: &[EntryHash]) -> Entry {
        let clock = LogicalClock::next_after(
            parents
                .iter()
                .filter_map(|p| self.arena.get(p))
                .map(Entry::clock),
        );
        let entry = EntryBuilder::new(operation)
            .clock(clock)
            .predecessors(parents.iter().copied())
            .sign(author)
            .expect("entry signs");
        self.arena.insert(entry.clone());
        entry
    }

    /// Append on top of the current frontier.
    pub fn append_head(&mut self, author: &Keypair, operation: Operation) -> Entry {
        let heads = self.arena.compute_frontier().to_vec();
        self.append(author, operation, &heads)
    }

    pub fn arena(&self) -> &EntryArena {
        &self.arena
    }

    /// Every entry, in causal order.
    pub fn entries(&self) -> Vec<Entry> {
        self.arena.causal_entries()
    }
}

/// Engines attached to one in-memory network.
pub struct Cluster {
    pub network: Arc<MemoryNetwork>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            network: MemoryNetwork::new(),
        }
    }

    /// An unattached engine with a deterministic key and fresh memory stores.
    pub async fn engine(&self, seed: u8, config: EngineConfig) -> SyncEngine {
        let transport = Arc::new(self.network.create_transport(NodeId::from_bytes([seed; 32])).await);
        let identity = Arc::new(Keypair::from_seed(&[seed; 32]));
        let store = Arc::new(MemoryStore::new());
        SyncEngine::new(
            EngineContext::new(store.clone(), store, transport, identity),
            config,
        )
    }

    /// Publish every entry of a hand-built log so engines can load it.
    pub async fn publish(&self, log: &LogFixture) {
        let transport = self.network.create_transport(NodeId::random()).await;
        for entry in log.entries() {
            transport
                .publish(&log.address, &entry)
                .await
                .expect("in-memory publish");
        }
    }

    /// Publish only the genesis of a hand-built log.
    pub async fn publish_genesis(&self, log: &LogFixture) {
        let transport = self.network.create_transport(NodeId::random()).await;
        transport
            .publish(&log.address, &log.genesis)
            .await
            .expect("in-memory publish");
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Create keypairs for multi-writer tests.
pub fn multi_party_keys(count: usize) -> Vec<Keypair> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            seed[1] = 0xd0;
            Keypair::from_seed(&seed)
        })
        .collect()
}
