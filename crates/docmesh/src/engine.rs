//! The sync engine: attaches a document store to one log and keeps the two
//! in step.
//!
//! All operations on an engine are serialized through one async mutex.
//! Transport fetches are the only network suspension points and are bounded
//! by [`EngineConfig::fetch_timeout`]; a failed fetch leaves the engine as it
//! was.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use docmesh_core::{
    validate_entry, Change, DocumentView, Entry, EntryHash, Frontier, LogAddress, Operation,
    PublicKeyId,
};
use docmesh_perms::{is_authorized, AccessPolicy};
use docmesh_store::DocumentStoreExt;
use docmesh_sync::{ReplicaDigest, Subscription};

use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::events::{EventBus, WriteEvent, WriteObserver, WriteOrigin};
use crate::log::EntryLog;

/// Lifecycle of an engine's attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogState {
    Unloaded,
    Loading,
    Loaded,
    Merging,
}

/// What a caller holds after creating or loading a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHandle {
    pub address: LogAddress,
    /// The local signing key.
    pub key: PublicKeyId,
}

/// Where merged entries come from.
#[derive(Debug, Clone)]
pub enum MergeSource {
    /// Fetch everything published under an address.
    Address(LogAddress),
    /// Entries already in hand, e.g. another engine's [`SyncEngine::export`].
    Entries(Vec<Entry>),
}

impl From<LogAddress> for MergeSource {
    fn from(address: LogAddress) -> Self {
        MergeSource::Address(address)
    }
}

impl From<&LogAddress> for MergeSource {
    fn from(address: &LogAddress) -> Self {
        MergeSource::Address(address.clone())
    }
}

impl From<Vec<Entry>> for MergeSource {
    fn from(entries: Vec<Entry>) -> Self {
        MergeSource::Entries(entries)
    }
}

/// Outcome of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Candidates received from the source.
    pub received: usize,
    /// Entries added to the log.
    pub accepted: usize,
    /// Candidates already known.
    pub duplicates: usize,
    /// Candidates rejected by validation or authorization.
    pub dropped: usize,
    /// Document keys whose visible value changed.
    pub changed_keys: BTreeSet<String>,
}

impl MergeReport {
    /// Whether the merge left the log untouched.
    pub fn is_noop(&self) -> bool {
        self.accepted == 0
    }
}

struct Attached {
    log: EntryLog,
    view: DocumentView,
    /// Set when the document store could not be brought back in line with
    /// `view` after a failed write.
    documents_stale: bool,
}

/// A replica of one log bound to a document store.
pub struct SyncEngine {
    context: EngineContext,
    config: EngineConfig,
    inner: Mutex<Option<Attached>>,
    state: watch::Sender<LogState>,
    events: EventBus,
}

impl SyncEngine {
    pub fn new(context: EngineContext, config: EngineConfig) -> Self {
        let (state, _) = watch::channel(LogState::Unloaded);
        let events = EventBus::new(config.event_capacity);
        Self {
            context,
            config,
            inner: Mutex::new(None),
            state,
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The local signing key.
    pub fn key(&self) -> PublicKeyId {
        self.context.identity.public_key()
    }

    pub fn state(&self) -> LogState {
        *self.state.borrow()
    }

    /// Follow state transitions.
    pub fn watch_state(&self) -> watch::Receiver<LogState> {
        self.state.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attach
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a new log named `name` and attach to it.
    ///
    /// The genesis authorizes the local key plus the configured initial
    /// writers.
    pub async fn create(&self, name: &str) -> Result<LogHandle> {
        let mut inner = self.inner.lock().await;
        if let Some(attached) = inner.as_ref() {
            return Err(EngineError::AlreadyAttached(attached.log.address().clone()));
        }

        let writers = std::iter::once(self.key()).chain(self.config.initial_writers.iter().copied());
        let (log, genesis) = EntryLog::create(
            self.context.entries.clone(),
            self.context.identity.as_ref(),
            name,
            writers,
        )
        .await?;
        let view = DocumentView::new();
        self.reconcile_documents(&view).await?;

        if self.config.publish_on_write {
            self.publish(log.address(), &genesis).await;
        }

        let handle = self.handle_for(log.address());
        info!(address = %handle.address, "created log");
        *inner = Some(Attached {
            log,
            view,
            documents_stale: false,
        });
        self.state.send_replace(LogState::Loaded);
        Ok(handle)
    }

    /// Attach to the log at `address`.
    ///
    /// Fetches the log through the transport, combines it with whatever the
    /// entry store already holds, replays it and brings the document store
    /// in line. Loading the address already attached returns its handle.
    pub async fn load(&self, address: &LogAddress) -> Result<LogHandle> {
        let mut inner = self.inner.lock().await;
        if let Some(attached) = inner.as_ref() {
            let current = attached.log.address();
            if current.matches(address) {
                return Ok(self.handle_for(current));
            }
            return Err(EngineError::IncompatibleLog(format!(
                "attached to {current}, cannot load {address}"
            )));
        }

        self.state.send_replace(LogState::Loading);
        match self.load_attached(address).await {
            Ok(attached) => {
                let handle = self.handle_for(attached.log.address());
                info!(
                    address = %handle.address,
                    entries = attached.log.len(),
                    documents = attached.view.len(),
                    "loaded log"
                );
                *inner = Some(attached);
                self.state.send_replace(LogState::Loaded);
                Ok(handle)
            }
            Err(e) => {
                self.state.send_replace(LogState::Unloaded);
                Err(e)
            }
        }
    }

    async fn load_attached(&self, address: &LogAddress) -> Result<Attached> {
        let mut candidates = self.fetch(address).await?;
        candidates.extend(self.context.entries.list_entries(&address.root()).await?);

        let genesis = candidates
            .iter()
            .find(|e| e.hash == address.root())
            .ok_or_else(|| EngineError::AddressNotFound(address.clone()))?;
        match &genesis.operation {
            Operation::Genesis { name, .. } if name == address.name() => {}
            _ => return Err(EngineError::AddressNotFound(address.clone())),
        }
        check_genesis(genesis)?;

        let mut log = EntryLog::empty(self.context.entries.clone(), address.clone());
        let plan = log.plan_merge(candidates, self.config.allow_foreign_merge);
        if plan.dropped > 0 {
            warn!(address = %address, dropped = plan.dropped, "excluded invalid entries on load");
        }
        log.integrate(plan).await?;

        let view = DocumentView::rebuild(&log.causal_entries());
        self.reconcile_documents(&view).await?;
        Ok(Attached {
            log,
            view,
            documents_stale: false,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Write
    // ─────────────────────────────────────────────────────────────────────────

    /// Append an operation, fold it into the view and notify observers.
    ///
    /// The document store is written before the entry is committed. On any
    /// failure the log, the view and the document store are left as they
    /// were and no event is emitted.
    pub async fn post(&self, operation: Operation) -> Result<Entry> {
        let mut inner = self.inner.lock().await;
        let attached = inner.as_mut().ok_or(EngineError::NotLoaded)?;
        self.repair_documents(attached).await?;

        let entry = attached
            .log
            .prepare_append(operation, self.context.identity.as_ref())?;

        let change = attached.view.preview(&entry);
        if let Some(change) = &change {
            self.context
                .documents
                .apply_changes(std::slice::from_ref(change))
                .await?;
        }
        if let Err(e) = attached.log.commit(entry.clone()).await {
            self.restore_documents(attached).await;
            return Err(e);
        }
        attached.view.fold(&entry);

        if self.config.publish_on_write {
            self.publish(attached.log.address(), &entry).await;
        }

        self.events.emit(WriteEvent {
            address: attached.log.address().clone(),
            changed_keys: change.iter().map(|c| c.key().to_string()).collect(),
            entries: vec![entry.hash],
            origin: WriteOrigin::Local,
        });
        Ok(entry)
    }

    pub async fn put(&self, key: impl Into<String>, value: Value) -> Result<Entry> {
        self.post(Operation::put(key, value)).await
    }

    pub async fn delete(&self, key: impl Into<String>) -> Result<Entry> {
        self.post(Operation::delete(key)).await
    }

    /// Store a document under a freshly generated key.
    pub async fn post_document(&self, value: Value) -> Result<(String, Entry)> {
        let key = hex::encode(rand::random::<[u8; 16]>());
        let entry = self.put(key.clone(), value).await?;
        Ok((key, entry))
    }

    /// Authorize another key to write.
    pub async fn grant(&self, key: PublicKeyId) -> Result<Entry> {
        self.post(Operation::Grant { key }).await
    }

    /// Withdraw a key's authorization for entries built on top of this one.
    pub async fn revoke(&self, key: PublicKeyId) -> Result<Entry> {
        self.post(Operation::Revoke { key }).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Merge
    // ─────────────────────────────────────────────────────────────────────────

    /// Combine another log's entries into this one.
    ///
    /// Invalid or unauthorized entries are dropped and counted in the
    /// report; they never fail the merge. Merging is idempotent and
    /// commutative.
    pub async fn merge(&self, source: impl Into<MergeSource>) -> Result<MergeReport> {
        let mut inner = self.inner.lock().await;
        let attached = inner.as_mut().ok_or(EngineError::NotLoaded)?;

        self.state.send_replace(LogState::Merging);
        let result = self.merge_into(attached, source.into()).await;
        self.state.send_replace(LogState::Loaded);
        result
    }

    async fn merge_into(&self, attached: &mut Attached, source: MergeSource) -> Result<MergeReport> {
        self.repair_documents(attached).await?;
        let local = attached.log.address().clone();
        let candidates = match source {
            MergeSource::Address(address) => {
                let foreign = !address.matches(&local);
                if foreign && !self.config.allow_foreign_merge {
                    return Err(EngineError::IncompatibleLog(format!(
                        "{address} does not share genesis with {local}"
                    )));
                }
                let fetched = self.fetch(&address).await?;
                if foreign {
                    let genesis = fetched
                        .iter()
                        .find(|e| e.hash == address.root())
                        .ok_or_else(|| EngineError::AddressNotFound(address.clone()))?;
                    check_genesis(genesis)?;
                }
                fetched
            }
            MergeSource::Entries(entries) => {
                for genesis in entries
                    .iter()
                    .filter(|e| e.is_genesis() && !attached.log.contains(&e.hash))
                {
                    if !self.config.allow_foreign_merge {
                        return Err(EngineError::IncompatibleLog(format!(
                            "genesis {} does not belong to {local}",
                            genesis.hash
                        )));
                    }
                    check_genesis(genesis)?;
                }
                entries
            }
        };

        let received = candidates.len();
        let plan = attached
            .log
            .plan_merge(candidates, self.config.allow_foreign_merge);
        let mut report = MergeReport {
            received,
            duplicates: plan.duplicates,
            dropped: plan.dropped,
            ..MergeReport::default()
        };
        if plan.dropped > 0 {
            warn!(address = %local, dropped = plan.dropped, "merge excluded invalid entries");
        }
        if plan.is_empty() {
            debug!(address = %local, received, "merge found nothing new");
            return Ok(report);
        }

        let mut view = attached.view.clone();
        let changes: Vec<Change> = plan
            .accepted
            .iter()
            .filter_map(|entry| view.fold(entry))
            .collect();
        if let Err(e) = self.context.documents.apply_changes(&changes).await {
            self.restore_documents(attached).await;
            return Err(e.into());
        }
        let added = match attached.log.integrate(plan).await {
            Ok(added) => added,
            Err(e) => {
                self.restore_documents(attached).await;
                return Err(e);
            }
        };
        attached.view = view;

        if self.config.publish_on_write {
            for entry in &added {
                self.publish(&local, entry).await;
            }
        }

        report.accepted = added.len();
        report.changed_keys = changes.iter().map(|c| c.key().to_string()).collect();
        debug!(
            address = %local,
            accepted = report.accepted,
            changed = report.changed_keys.len(),
            "merged"
        );

        self.events.emit(WriteEvent {
            address: local,
            changed_keys: report.changed_keys.clone(),
            entries: added.iter().map(|e| e.hash).collect(),
            origin: WriteOrigin::Merge,
        });
        Ok(report)
    }

    /// Replay the whole log from genesis and bring the document store in
    /// line with the result.
    pub async fn rebuild(&self) -> Result<DocumentView> {
        let mut inner = self.inner.lock().await;
        let attached = inner.as_mut().ok_or(EngineError::NotLoaded)?;

        let rebuilt = DocumentView::rebuild(&attached.log.causal_entries());
        let drift = attached.view.diff(&rebuilt);
        if !drift.is_empty() {
            warn!(keys = drift.len(), "incremental view differed from replay");
        }
        attached.view = rebuilt;
        let repaired = self.reconcile_documents(&attached.view).await?;
        attached.documents_stale = false;
        debug!(documents = attached.view.len(), repaired, "rebuilt view");
        Ok(attached.view.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn address(&self) -> Option<LogAddress> {
        self.inner
            .lock()
            .await
            .as_ref()
            .map(|a| a.log.address().clone())
    }

    pub async fn handle(&self) -> Result<LogHandle> {
        let inner = self.inner.lock().await;
        let attached = inner.as_ref().ok_or(EngineError::NotLoaded)?;
        Ok(self.handle_for(attached.log.address()))
    }

    pub async fn frontier(&self) -> Result<Frontier> {
        self.read(|a| a.log.frontier().clone()).await
    }

    pub async fn get(&self, hash: &EntryHash) -> Result<Entry> {
        let inner = self.inner.lock().await;
        let attached = inner.as_ref().ok_or(EngineError::NotLoaded)?;
        attached.log.get(hash).cloned()
    }

    /// Entries not reachable from `known`, in causal order.
    pub async fn entries_since(&self, known: &[EntryHash]) -> Result<Vec<Entry>> {
        self.read(|a| a.log.entries_since(known.iter().copied())).await
    }

    /// The whole log in causal order, suitable for [`MergeSource::Entries`].
    pub async fn export(&self) -> Result<Vec<Entry>> {
        self.read(|a| a.log.causal_entries()).await
    }

    pub async fn entry_count(&self) -> Result<usize> {
        self.read(|a| a.log.len()).await
    }

    pub async fn document(&self, key: &str) -> Result<Option<Value>> {
        self.read(|a| a.view.get(key).cloned()).await
    }

    /// Live documents in key order.
    pub async fn all_documents(&self) -> Result<Vec<(String, Value)>> {
        self.read(|a| {
            a.view
                .documents()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect()
        })
        .await
    }

    pub async fn view(&self) -> Result<DocumentView> {
        self.read(|a| a.view.clone()).await
    }

    /// Keys allowed to write on top of the current frontier.
    pub async fn writers(&self) -> Result<BTreeSet<PublicKeyId>> {
        self.read(|a| a.log.writers()).await
    }

    /// Digest for comparing replicas.
    pub async fn digest(&self) -> Result<ReplicaDigest> {
        self.read(|a| {
            ReplicaDigest::compute(
                a.log.root(),
                a.log.len() as u64,
                a.log.frontier(),
                &a.view,
            )
        })
        .await
    }

    /// Subscribe to entries published under the attached address.
    ///
    /// Received entries can be fed back through [`merge`](Self::merge).
    pub async fn subscribe(&self) -> Result<Subscription> {
        let address = self.address().await.ok_or(EngineError::NotLoaded)?;
        Ok(self.context.transport.subscribe(&address).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observers
    // ─────────────────────────────────────────────────────────────────────────

    pub fn register_observer(&self, observer: Arc<dyn WriteObserver>) {
        self.events.register(observer);
    }

    /// A channel receiving every write event from now on.
    pub fn events(&self) -> broadcast::Receiver<WriteEvent> {
        self.events.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn handle_for(&self, address: &LogAddress) -> LogHandle {
        LogHandle {
            address: address.clone(),
            key: self.key(),
        }
    }

    async fn read<T>(&self, f: impl FnOnce(&Attached) -> T) -> Result<T> {
        let inner = self.inner.lock().await;
        inner.as_ref().map(f).ok_or(EngineError::NotLoaded)
    }

    async fn fetch(&self, address: &LogAddress) -> Result<Vec<Entry>> {
        let timeout = self.config.fetch_timeout;
        match tokio::time::timeout(timeout, self.context.transport.fetch_all(address)).await {
            Ok(fetched) => {
                let fetched = fetched?;
                debug!(address = %address, fetched = fetched.len(), "fetched entries");
                Ok(fetched)
            }
            Err(_) => {
                warn!(address = %address, ?timeout, "fetch timed out");
                Err(EngineError::Timeout(timeout))
            }
        }
    }

    /// Best effort: a lost publication is recovered by the next full fetch.
    async fn publish(&self, address: &LogAddress, entry: &Entry) {
        if let Err(e) = self.context.transport.publish(address, entry).await {
            warn!(address = %address, entry = %entry.hash, error = %e, "publish failed");
        }
    }

    /// Make the document store hold exactly the live documents of `view`.
    /// Returns the number of documents written or removed.
    async fn reconcile_documents(&self, view: &DocumentView) -> Result<usize> {
        let stored: BTreeMap<String, Value> = self
            .context
            .documents
            .all_entries()
            .await?
            .into_iter()
            .collect();

        let mut changes: Vec<Change> = view
            .documents()
            .filter(|(key, value)| stored.get(*key) != Some(*value))
            .map(|(key, value)| Change::Put {
                key: key.to_string(),
                value: value.clone(),
            })
            .collect();
        changes.extend(
            stored
                .keys()
                .filter(|key| view.get(key).is_none())
                .map(|key| Change::Delete { key: key.clone() }),
        );

        self.context.documents.apply_changes(&changes).await?;
        Ok(changes.len())
    }

    /// Undo document writes made for a change that was not committed.
    async fn restore_documents(&self, attached: &mut Attached) {
        if let Err(e) = self.reconcile_documents(&attached.view).await {
            warn!(error = %e, "document store out of step with the log");
            attached.documents_stale = true;
        }
    }

    /// Bring a stale document store back in line before the next write.
    async fn repair_documents(&self, attached: &mut Attached) -> Result<()> {
        if attached.documents_stale {
            let repaired = self.reconcile_documents(&attached.view).await?;
            attached.documents_stale = false;
            debug!(repaired, "repaired document store");
        }
        Ok(())
    }
}

/// A genesis must be well formed and authorize itself.
fn check_genesis(genesis: &Entry) -> Result<()> {
    validate_entry(genesis).map_err(|e| EngineError::AccessDenied(e.to_string()))?;
    if !is_authorized(genesis, &AccessPolicy::new()) {
        return Err(EngineError::AccessDenied(format!(
            "genesis {} is not signed by one of its writers",
            genesis.hash
        )));
    }
    Ok(())
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("context", &self.context)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
