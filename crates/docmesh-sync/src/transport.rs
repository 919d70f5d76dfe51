//! Transport abstraction for moving log entries between replicas.
//!
//! A transport is a topic-per-log publish/subscribe channel with a fetch
//! that returns everything currently retrievable for a log. Delivery is
//! unordered and may be duplicated or lossy; receivers validate everything.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::warn;

use docmesh_core::{Entry, LogAddress};

use crate::error::SyncError;
use crate::messages::{Envelope, NodeId};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Transport trait for publishing and retrieving log entries.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Announce an entry on the log's topic.
    async fn publish(&self, address: &LogAddress, entry: &Entry) -> Result<()>;

    /// Retrieve every entry currently reachable for the log.
    ///
    /// The result is unordered and may contain duplicates.
    async fn fetch_all(&self, address: &LogAddress) -> Result<Vec<Entry>>;

    /// Receive entries published to the log from now on.
    async fn subscribe(&self, address: &LogAddress) -> Result<Subscription>;

    /// Get the local node's identity.
    fn local_node_id(&self) -> NodeId;
}

/// A live feed of entries published to one log.
pub struct Subscription {
    address: LogAddress,
    receiver: broadcast::Receiver<Bytes>,
}

impl Subscription {
    /// Wrap a feed of encoded envelopes.
    pub fn new(address: LogAddress, receiver: broadcast::Receiver<Bytes>) -> Self {
        Self { address, receiver }
    }

    pub fn address(&self) -> &LogAddress {
        &self.address
    }

    /// Wait for the next decodable entry.
    ///
    /// Malformed messages are skipped; a lagging receiver skips what it
    /// missed.
    pub async fn next_entry(&mut self) -> Result<Entry> {
        loop {
            let raw = match self.receiver.recv().await {
                Ok(raw) => raw,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(address = %self.address, missed, "subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Err(SyncError::Closed),
            };

            let envelope = match Envelope::decode(&raw) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(address = %self.address, error = %e, "dropping undecodable message");
                    continue;
                }
            };

            for entry in envelope.message.decode_entries() {
                match entry {
                    Ok(entry) => return Ok(entry),
                    Err(e) => warn!(address = %self.address, error = %e, "dropping malformed entry"),
                }
            }
        }
    }

    /// Receive with timeout.
    ///
    /// Returns None if the timeout expires before an entry arrives.
    pub async fn next_entry_timeout(&mut self, timeout: Duration) -> Result<Option<Entry>> {
        match tokio::time::timeout(timeout, self.next_entry()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}

/// A shared in-memory network for tests and single-process deployments.
///
/// Every published entry is retained per log root, so `fetch_all` sees the
/// full history. Fault injection covers latency, disconnected nodes and
/// dropped publications.
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    use docmesh_core::EntryHash;

    use crate::messages::SyncMessage;

    /// Capacity of each topic's live feed.
    const FEED_CAPACITY: usize = 1024;

    struct Topic {
        /// Encoded entries in publication order, duplicates included.
        retained: Vec<Bytes>,
        feed: broadcast::Sender<Bytes>,
    }

    impl Topic {
        fn new() -> Self {
            let (feed, _) = broadcast::channel(FEED_CAPACITY);
            Self {
                retained: Vec::new(),
                feed,
            }
        }
    }

    #[derive(Debug, Default, Clone)]
    struct Faults {
        latency: Duration,
        offline: HashSet<NodeId>,
        drop_every_nth: Option<u64>,
    }

    /// Shared state for the memory transport network.
    pub struct MemoryNetwork {
        topics: RwLock<HashMap<EntryHash, Topic>>,
        faults: RwLock<Faults>,
        publications: AtomicU64,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport connected to this network.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            self.faults.write().await.offline.remove(&node_id);
            MemoryTransport {
                node_id,
                network: Arc::clone(self),
            }
        }

        // ─────────────────────────────────────────────────────────────────
        // Fault injection
        // ─────────────────────────────────────────────────────────────────

        /// Delay every publish and fetch by `latency`.
        pub async fn set_latency(&self, latency: Duration) {
            self.faults.write().await.latency = latency;
        }

        /// Disconnect or reconnect a node.
        pub async fn set_offline(&self, node: NodeId, offline: bool) {
            let mut faults = self.faults.write().await;
            if offline {
                faults.offline.insert(node);
            } else {
                faults.offline.remove(&node);
            }
        }

        /// Silently lose every `n`th publication. `None` or `Some(0)` disables.
        pub async fn set_drop_every_nth(&self, n: Option<u64>) {
            self.faults.write().await.drop_every_nth = n.filter(|n| *n > 0);
        }

        /// Place raw bytes on a log's topic, bypassing encoding.
        ///
        /// Lets tests hand replicas corrupted or forged entries.
        pub async fn inject_raw(&self, address: &LogAddress, entry: Bytes) {
            self.topics
                .write()
                .await
                .entry(address.root())
                .or_insert_with(Topic::new)
                .retained
                .push(entry);
        }

        /// Number of entries retained for a log, duplicates included.
        pub async fn retained(&self, address: &LogAddress) -> usize {
            self.topics
                .read()
                .await
                .get(&address.root())
                .map_or(0, |topic| topic.retained.len())
        }

        async fn admit(&self, node: &NodeId) -> Result<()> {
            let faults = self.faults.read().await.clone();
            if !faults.latency.is_zero() {
                tokio::time::sleep(faults.latency).await;
            }
            if faults.offline.contains(node) {
                return Err(SyncError::Offline);
            }
            Ok(())
        }

        async fn should_drop(&self) -> bool {
            let count = self.publications.fetch_add(1, Ordering::SeqCst) + 1;
            match self.faults.read().await.drop_every_nth {
                Some(n) => count % n == 0,
                None => false,
            }
        }
    }

    impl Default for MemoryNetwork {
        fn default() -> Self {
            Self {
                topics: RwLock::new(HashMap::new()),
                faults: RwLock::new(Faults::default()),
                publications: AtomicU64::new(0),
            }
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
    }

    impl MemoryTransport {
        pub fn network(&self) -> &Arc<MemoryNetwork> {
            &self.network
        }
    }

    #[async_trait]
    impl LogTransport for MemoryTransport {
        async fn publish(&self, address: &LogAddress, entry: &Entry) -> Result<()> {
            self.network.admit(&self.node_id).await?;

            let message = SyncMessage::published(address, entry);
            let encoded = Envelope::new(self.node_id, message.clone()).encode()?;

            if self.network.should_drop().await {
                warn!(address = %address, entry = %entry.hash, "network dropped publication");
                return Ok(());
            }

            let mut topics = self.network.topics.write().await;
            let topic = topics.entry(address.root()).or_insert_with(Topic::new);
            topic.retained.extend(message.raw_entries().iter().cloned());
            // No live subscribers is not an error.
            let _ = topic.feed.send(encoded);
            Ok(())
        }

        async fn fetch_all(&self, address: &LogAddress) -> Result<Vec<Entry>> {
            self.network.admit(&self.node_id).await?;

            let snapshot = {
                let topics = self.network.topics.read().await;
                let entries = topics
                    .get(&address.root())
                    .map(|topic| topic.retained.clone())
                    .unwrap_or_default();
                Envelope::new(
                    self.node_id,
                    SyncMessage::Snapshot {
                        address: address.clone(),
                        entries,
                    },
                )
            };

            let received = Envelope::decode(&snapshot.encode()?)?;
            let mut entries = Vec::new();
            for entry in received.message.decode_entries() {
                match entry {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(address = %address, error = %e, "skipping malformed entry"),
                }
            }
            Ok(entries)
        }

        async fn subscribe(&self, address: &LogAddress) -> Result<Subscription> {
            self.network.admit(&self.node_id).await?;
            let mut topics = self.network.topics.write().await;
            let topic = topics.entry(address.root()).or_insert_with(Topic::new);
            Ok(Subscription::new(address.clone(), topic.feed.subscribe()))
        }

        fn local_node_id(&self) -> NodeId {
            self.node_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use docmesh_core::{EntryBuilder, Keypair, Operation};

    fn log(keypair: &Keypair) -> (LogAddress, Entry, Entry) {
        let genesis = EntryBuilder::new(Operation::genesis("inbox", [keypair.public_key()]))
            .sign(keypair)
            .unwrap();
        let put = EntryBuilder::new(Operation::put("k", serde_json::json!({"n": 1})))
            .clock(genesis.clock().tick())
            .predecessors([genesis.hash])
            .sign(keypair)
            .unwrap();
        (LogAddress::derive(&genesis, "inbox").unwrap(), genesis, put)
    }

    #[tokio::test]
    async fn test_publish_then_fetch() {
        let network = MemoryNetwork::new();
        let keypair = Keypair::from_seed(&[1; 32]);
        let (address, genesis, put) = log(&keypair);

        let transport_a = network.create_transport(NodeId::from_bytes([0xAA; 32])).await;
        let transport_b = network.create_transport(NodeId::from_bytes([0xBB; 32])).await;

        transport_a.publish(&address, &genesis).await.unwrap();
        transport_a.publish(&address, &put).await.unwrap();
        transport_a.publish(&address, &put).await.unwrap();

        let fetched = transport_b.fetch_all(&address).await.unwrap();
        assert_eq!(fetched.len(), 3);
        assert!(fetched.contains(&genesis));
        assert!(fetched.contains(&put));
    }

    #[tokio::test]
    async fn test_unknown_log_is_empty() {
        let network = MemoryNetwork::new();
        let (address, _, _) = log(&Keypair::from_seed(&[1; 32]));
        let transport = network.create_transport(NodeId::random()).await;
        assert!(transport.fetch_all(&address).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscription_receives_publications() {
        let network = MemoryNetwork::new();
        let keypair = Keypair::from_seed(&[1; 32]);
        let (address, genesis, _) = log(&keypair);

        let transport_a = network.create_transport(NodeId::from_bytes([0xAA; 32])).await;
        let transport_b = network.create_transport(NodeId::from_bytes([0xBB; 32])).await;

        let mut subscription = transport_b.subscribe(&address).await.unwrap();
        transport_a.publish(&address, &genesis).await.unwrap();

        let received = subscription
            .next_entry_timeout(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(received, Some(genesis));
        assert_eq!(
            subscription
                .next_entry_timeout(Duration::from_millis(20))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_offline_node_fails() {
        let network = MemoryNetwork::new();
        let (address, genesis, _) = log(&Keypair::from_seed(&[1; 32]));
        let node = NodeId::from_bytes([0xCC; 32]);
        let transport = network.create_transport(node).await;

        network.set_offline(node, true).await;
        assert!(matches!(
            transport.publish(&address, &genesis).await,
            Err(SyncError::Offline)
        ));
        assert!(matches!(
            transport.fetch_all(&address).await,
            Err(SyncError::Offline)
        ));

        network.set_offline(node, false).await;
        transport.publish(&address, &genesis).await.unwrap();
        assert_eq!(network.retained(&address).await, 1);
    }

    #[tokio::test]
    async fn test_drop_every_nth() {
        let network = MemoryNetwork::new();
        let keypair = Keypair::from_seed(&[1; 32]);
        let (address, genesis, put) = log(&keypair);
        let transport = network.create_transport(NodeId::random()).await;

        network.set_drop_every_nth(Some(2)).await;
        transport.publish(&address, &genesis).await.unwrap();
        transport.publish(&address, &put).await.unwrap();

        let fetched = transport.fetch_all(&address).await.unwrap();
        assert_eq!(fetched, vec![genesis]);
    }

    #[tokio::test]
    async fn test_latency_exceeds_timeout() {
        let network = MemoryNetwork::new();
        let (address, _, _) = log(&Keypair::from_seed(&[1; 32]));
        let transport = network.create_transport(NodeId::random()).await;

        network.set_latency(Duration::from_millis(200)).await;
        let result =
            tokio::time::timeout(Duration::from_millis(20), transport.fetch_all(&address)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_injected_garbage_skipped() {
        let network = MemoryNetwork::new();
        let keypair = Keypair::from_seed(&[1; 32]);
        let (address, genesis, _) = log(&keypair);
        let transport = network.create_transport(NodeId::random()).await;

        network
            .inject_raw(&address, Bytes::from_static(b"not an entry"))
            .await;
        transport.publish(&address, &genesis).await.unwrap();

        assert_eq!(transport.fetch_all(&address).await.unwrap(), vec![genesis]);
    }
}
