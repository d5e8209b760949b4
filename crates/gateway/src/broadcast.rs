//! Status fan-out hub.
//!
//! The session machine is the only publisher. Each subscriber owns a bounded
//! outbox; publish never waits on one. A subscriber whose outbox is full or
//! closed is unregistered on the spot and its outbox is closed, so it sees the
//! frames already queued and then the end of its stream.
//!
//! Registration and fan-out share one short critical section. That gives every
//! subscriber the same relative order of publishes, and makes the synthetic
//! first frame of a new subscriber exactly the latest publish.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    courier_protocol::{StatusEvent, StatusFrame},
    tokio::sync::mpsc::{self, error::TrySendError},
    tracing::debug,
};

/// Identity of one subscriber, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Registry {
    outboxes: HashMap<SubscriberId, mpsc::Sender<StatusFrame>>,
    /// Latest published frame, replayed as the first frame of new subscribers.
    latest: StatusFrame,
}

pub struct StatusHub {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    outbox_capacity: usize,
}

impl StatusHub {
    /// Create a hub whose initial snapshot is `initial` (seq 0).
    pub fn new(initial: StatusEvent, outbox_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry {
                outboxes: HashMap::new(),
                latest: StatusFrame {
                    seq: 0,
                    snapshot: false,
                    event: initial,
                },
            }),
            next_id: AtomicU64::new(1),
            outbox_capacity: outbox_capacity.max(1),
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber. Its first frame is a snapshot of the latest
    /// publish, followed by every later publish.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        {
            let mut registry = self.registry();
            let mut first = registry.latest.clone();
            first.snapshot = true;
            // A fresh outbox has room for at least one frame.
            let _ = tx.try_send(first);
            registry.outboxes.insert(id, tx);
        }
        debug!(subscriber = %id, "status subscriber registered");
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(self),
        }
    }

    /// Deliver `event` to every registered subscriber. Returns its seq.
    pub(crate) fn publish(&self, event: StatusEvent) -> u64 {
        let mut registry = self.registry();
        let frame = StatusFrame {
            seq: registry.latest.seq + 1,
            snapshot: false,
            event,
        };

        let mut dropped = Vec::new();
        for (id, outbox) in &registry.outboxes {
            match outbox.try_send(frame.clone()) {
                Ok(()) => {},
                Err(TrySendError::Full(_)) => dropped.push((*id, "outbox full")),
                Err(TrySendError::Closed(_)) => dropped.push((*id, "closed")),
            }
        }
        for (id, reason) in dropped {
            registry.outboxes.remove(&id);
            debug!(subscriber = %id, reason, "status subscriber dropped");
        }

        let seq = frame.seq;
        registry.latest = frame;
        seq
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.registry().outboxes.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "status subscriber unregistered");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().outboxes.len()
    }

    /// The latest published frame.
    pub fn latest(&self) -> StatusFrame {
        self.registry().latest.clone()
    }
}

/// Receiving end of one subscriber. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<StatusFrame>,
    hub: Weak<StatusHub>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next frame, or `None` once the hub has dropped this subscriber and the
    /// queued frames are drained.
    pub async fn recv(&mut self) -> Option<StatusFrame> {
        self.rx.recv().await
    }

    /// Next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<StatusFrame> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}
