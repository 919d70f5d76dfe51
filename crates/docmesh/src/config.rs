//! Engine configuration.

use std::time::Duration;

use docmesh_core::PublicKeyId;

/// Configuration for a [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single transport fetch during load or merge.
    pub fetch_timeout: Duration,
    /// Whether logs with a different genesis may be merged in.
    pub allow_foreign_merge: bool,
    /// Whether appended and merged entries are published to the log's topic.
    pub publish_on_write: bool,
    /// Keys authorized in the genesis of logs this engine creates, in
    /// addition to its own.
    pub initial_writers: Vec<PublicKeyId>,
    /// Buffer size of the write event channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            allow_foreign_merge: true,
            publish_on_write: true,
            initial_writers: Vec::new(),
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_foreign_merge(mut self, allow: bool) -> Self {
        self.allow_foreign_merge = allow;
        self
    }

    pub fn with_publish_on_write(mut self, publish: bool) -> Self {
        self.publish_on_write = publish;
        self
    }

    pub fn with_initial_writers(mut self, writers: impl IntoIterator<Item = PublicKeyId>) -> Self {
        self.initial_writers = writers.into_iter().collect();
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
