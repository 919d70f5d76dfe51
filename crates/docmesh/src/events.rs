//! Write notifications.
//!
//! Every event is delivered after the view and document store reflect it.
//! Observers are called synchronously, in registration order; the broadcast
//! channel receives the same event afterwards. Delivery is at-least-once per
//! logical change: a replica that restarts and re-merges may report keys
//! again.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::trace;

use docmesh_core::{EntryHash, LogAddress};

/// What caused a write event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// A local `post`.
    Local,
    /// Entries accepted by a `merge`.
    Merge,
}

/// Summary of one state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEvent {
    pub address: LogAddress,
    /// Document keys whose visible value changed.
    pub changed_keys: BTreeSet<String>,
    /// Entries added to the log, in causal order.
    pub entries: Vec<EntryHash>,
    pub origin: WriteOrigin,
}

/// Receives write events.
pub trait WriteObserver: Send + Sync {
    fn on_write(&self, event: &WriteEvent);
}

impl<F> WriteObserver for F
where
    F: Fn(&WriteEvent) + Send + Sync,
{
    fn on_write(&self, event: &WriteEvent) {
        self(event)
    }
}

/// Fan-out to registered observers and channel subscribers.
pub(crate) struct EventBus {
    observers: RwLock<Vec<Arc<dyn WriteObserver>>>,
    sender: broadcast::Sender<WriteEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            observers: RwLock::new(Vec::new()),
            sender,
        }
    }

    pub(crate) fn register(&self, observer: Arc<dyn WriteObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<WriteEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: WriteEvent) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in &observers {
            observer.on_write(&event);
        }

        trace!(
            address = %event.address,
            keys = event.changed_keys.len(),
            entries = event.entries.len(),
            "write event"
        );
        // No receivers is fine.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> WriteEvent {
        WriteEvent {
            address: LogAddress::new(EntryHash([1; 32]), "events").unwrap(),
            changed_keys: ["a".to_string()].into_iter().collect(),
            entries: vec![EntryHash([2; 32])],
            origin: WriteOrigin::Local,
        }
    }

    #[test]
    fn test_observers_and_channel_receive() {
        let bus = EventBus::new(8);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        bus.register(Arc::new(move |e: &WriteEvent| {
            assert!(e.changed_keys.contains("a"));
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let mut rx = bus.subscribe();

        bus.emit(event());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rx.try_recv().unwrap(), event());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_without_listeners() {
        EventBus::new(1).emit(event());
    }
}
