//! Lifecycle events emitted while a node is executed
//!
//! Handlers receive a copy of the node's outcome at emission time. They
//! cannot reach back into the engine, and a panicking handler is logged and
//! otherwise ignored.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

use crate::snapshot::NodeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    #[serde(rename = "begin")]
    Begin,
    #[serde(rename = "started:resolve")]
    StartedResolve,
    #[serde(rename = "eventual")]
    Eventual,
    #[serde(rename = "resolved")]
    Resolved,
    #[serde(rename = "started:completion")]
    StartedCompletion,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "end")]
    End,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 7] = [
        LifecycleEvent::Begin,
        LifecycleEvent::StartedResolve,
        LifecycleEvent::Eventual,
        LifecycleEvent::Resolved,
        LifecycleEvent::StartedCompletion,
        LifecycleEvent::Completed,
        LifecycleEvent::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Begin => "begin",
            LifecycleEvent::StartedResolve => "started:resolve",
            LifecycleEvent::Eventual => "eventual",
            LifecycleEvent::Resolved => "resolved",
            LifecycleEvent::StartedCompletion => "started:completion",
            LifecycleEvent::Completed => "completed",
            LifecycleEvent::End => "end",
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub event: LifecycleEvent,
    pub outcome: NodeOutcome,
}

pub type EventHandler = Arc<dyn Fn(&NodeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    event: LifecycleEvent,
    id: u64,
}

struct Subscription {
    id: u64,
    once: bool,
    handler: EventHandler,
}

/// Fixed table of subscriber lists, one per [`LifecycleEvent`]
#[derive(Default)]
pub struct EventChannels {
    slots: RwLock<[Vec<Subscription>; 7]>,
    next_id: AtomicU64,
}

impl EventChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, event: LifecycleEvent, handler: F) -> SubscriptionId
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        self.add(event, Arc::new(handler), false)
    }

    /// Handler removed after its first delivery
    pub fn once<F>(&self, event: LifecycleEvent, handler: F) -> SubscriptionId
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        self.add(event, Arc::new(handler), true)
    }

    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut slots = self.slots.write();
        let slot = &mut slots[subscription.event.slot()];
        let before = slot.len();
        slot.retain(|s| s.id != subscription.id);
        slot.len() != before
    }

    pub fn subscriber_count(&self, event: LifecycleEvent) -> usize {
        self.slots.read()[event.slot()].len()
    }

    pub fn has_subscribers(&self, event: LifecycleEvent) -> bool {
        self.subscriber_count(event) > 0
    }

    /// Deliver `event` to its subscribers; handlers run with no lock held
    pub fn publish(&self, event: &NodeEvent) {
        let handlers: Vec<EventHandler> = {
            let mut slots = self.slots.write();
            let slot = &mut slots[event.event.slot()];
            let handlers = slot.iter().map(|s| s.handler.clone()).collect();
            slot.retain(|s| !s.once);
            handlers
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!("Lifecycle handler for '{}' panicked", event.event);
            }
        }
    }

    fn add(&self, event: LifecycleEvent, handler: EventHandler, once: bool) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.write()[event.slot()].push(Subscription { id, once, handler });
        SubscriptionId { event, id }
    }
}
