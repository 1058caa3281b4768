//! Commit-event fan-out (spec §3 "Ownership", §4.1 `subscribe`, §9).
//!
//! Subscribers (the HNSW index, the temporal engine) never hold a reference
//! into [`super::StorageCore`]'s internals; they only ever see the events
//! delivered here, in WAL sequence order.

use crate::model::{Edge, Node};
use crate::wal::OperationKind;
use std::sync::{Arc, Mutex};

/// One committed change, as delivered to subscribers after it is both
/// WAL-durable and applied to [`super::StorageCore`].
#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub sequence: u64,
    pub op: OperationKind,
    pub node: Option<Node>,
    pub edge: Option<Edge>,
}

/// A commit-event observer. Implementations must never panic on a
/// malformed event (spec §7): they are observers, not participants in the
/// write path, and a panic here would take the writer lock down with it.
pub trait EventSink: Send + Sync {
    fn on_commit(&self, event: &CommitEvent);
}

#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Arc<Mutex<Vec<Arc<dyn EventSink>>>>,
}

/// Handle returned by [`EventBus::subscribe`]; dropping it does not
/// unsubscribe (subscriptions are for the engine's lifetime, per spec §3).
pub struct SubscriptionHandle(pub(crate) usize);

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionHandle {
        let mut sinks = self.sinks.lock().expect("event bus mutex poisoned");
        sinks.push(sink);
        SubscriptionHandle(sinks.len() - 1)
    }

    pub fn publish(&self, event: &CommitEvent) {
        let sinks = self.sinks.lock().expect("event bus mutex poisoned");
        for sink in sinks.iter() {
            sink.on_commit(event);
        }
    }
}
