//! Fan-out of task events to connected subscribers.

use sift_core::{EventSink, ProgressEvent, TaskId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Identifies one subscriber of a [`ProgressHub`].
pub type SubscriberId = u64;

/// Receiving end handed to a subscriber.
#[derive(Debug)]
pub struct Subscription {
    /// Id to pass to [`ProgressHub::unsubscribe`]
    pub id: SubscriberId,
    /// Events in emission order
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl Subscription {
    /// Drop events already queued for this subscriber. Returns how many.
    ///
    /// Called before a full snapshot is taken so that no queued event older
    /// than the snapshot is delivered after it.
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        while self.events.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

struct Subscriber {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    filter: Option<HashSet<TaskId>>,
}

impl Subscriber {
    fn wants(&self, event: &ProgressEvent) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |ids| ids.contains(&event.task_id))
    }
}

/// Delivers every emitted event to all current subscribers.
///
/// Emission never blocks: each subscriber owns an unbounded queue, so events
/// for one task reach every subscriber in the order they were emitted.
/// Subscribers whose receiver was dropped are pruned on the next emit.
#[derive(Default)]
pub struct ProgressHub {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
}

impl ProgressHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, filter: Option<HashSet<TaskId>>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, events) = mpsc::unbounded_channel();
        self.lock().insert(id, Subscriber { tx, filter });
        tracing::debug!(subscriber = id, "Subscriber added");
        Subscription { id, events }
    }

    /// Receive events for every task.
    pub fn subscribe(&self) -> Subscription {
        self.register(None)
    }

    /// Receive events only for the given tasks.
    pub fn subscribe_to(&self, task_ids: impl IntoIterator<Item = TaskId>) -> Subscription {
        self.register(Some(task_ids.into_iter().collect()))
    }

    /// Stop delivering to a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.lock().remove(&id).is_some() {
            tracing::debug!(subscriber = id, "Subscriber removed");
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}

impl EventSink for ProgressHub {
    fn emit(&self, event: ProgressEvent) {
        self.lock().retain(|id, subscriber| {
            if subscriber.wants(&event) {
                let delivered = subscriber.tx.send(event.clone()).is_ok();
                if !delivered {
                    tracing::debug!(subscriber = *id, "Pruning closed subscriber");
                }
                delivered
            } else {
                !subscriber.tx.is_closed()
            }
        });
    }
}

impl std::fmt::Debug for ProgressHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
