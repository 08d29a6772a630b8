use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::{watch, Notify};
use tracing::debug;

use crate::core::diagnostics::Diagnostics;
use crate::core::models::snapshot::Snapshot;

pub type SubscriptionId = u64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Per-subscriber state shared between the registry and the subscription.
#[derive(Debug, Default)]
struct Membership {
    dropped: AtomicU64,
    closed: AtomicBool,
    unsubscribed: AtomicBool,
    wake: Notify,
}

impl Membership {
    fn unsubscribe(&self) {
        self.unsubscribed.store(true, Ordering::Release);
        self.closed.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}

#[derive(Debug)]
struct Registry {
    next_id: SubscriptionId,
    members: HashMap<SubscriptionId, Arc<Membership>>,
    /// Taken on close; receivers then drain and end
    sender: Option<broadcast::Sender<Arc<Snapshot>>>,
}

/// Holds the current snapshot and fans each new one out to subscribers.
///
/// Publication and registration take the same lock, so a new subscriber
/// is seeded with the latest snapshot exactly once and its broadcast
/// receiver starts with the next one.
#[derive(Debug)]
pub struct Publisher {
    registry: Arc<Mutex<Registry>>,
    current: watch::Sender<Arc<Snapshot>>,
    capacity: usize,
    diagnostics: Arc<Diagnostics>,
}

impl Publisher {
    pub fn new(initial: Snapshot, capacity: usize, diagnostics: Arc<Diagnostics>) -> Self {
        let capacity = capacity.max(1);
        let (current, _) = watch::channel(Arc::new(initial));
        let (sender, _) = broadcast::channel(capacity);
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 1,
                members: HashMap::new(),
                sender: Some(sender),
            })),
            current,
            capacity,
            diagnostics,
        }
    }

    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        let registry = lock(&self.registry);
        self.current.send_replace(Arc::clone(&snapshot));
        if let Some(sender) = &registry.sender {
            // Err only means nobody is subscribed
            let _ = sender.send(Arc::clone(&snapshot));
        }
        drop(registry);

        Diagnostics::incr(&self.diagnostics.snapshots_published);
        snapshot
    }

    pub fn subscribe(&self) -> Subscription {
        let membership = Arc::new(Membership::default());
        let mut registry = lock(&self.registry);

        let id = registry.next_id;
        registry.next_id += 1;
        let (seed, receiver) = match &registry.sender {
            Some(sender) => (Some(self.current.borrow().clone()), sender.subscribe()),
            None => {
                membership.closed.store(true, Ordering::Release);
                // Sender dropped at once, so the receiver reports closed
                (None, broadcast::channel(1).1)
            }
        };
        if seed.is_some() {
            registry.members.insert(id, Arc::clone(&membership));
        }
        debug!(subscription = id, subscribers = registry.members.len(), "Subscriber registered");

        Subscription {
            id,
            seed,
            receiver,
            capacity: self.capacity,
            membership,
            diagnostics: Arc::clone(&self.diagnostics),
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Returns false if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        unregister(&self.registry, id)
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.current.borrow().clone()
    }

    /// A receiver that always holds the current snapshot.
    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.current.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).members.len()
    }

    /// Close every subscription and refuse new ones. Subscribers still
    /// receive what was published before the close.
    pub fn close_all(&self) {
        let mut registry = lock(&self.registry);
        registry.sender = None;
        for (_, membership) in registry.members.drain() {
            membership.closed.store(true, Ordering::Release);
        }
    }
}

fn unregister(registry: &Mutex<Registry>, id: SubscriptionId) -> bool {
    match lock(registry).members.remove(&id) {
        Some(membership) => {
            membership.unsubscribe();
            debug!(subscription = id, "Subscriber removed");
            true
        }
        None => false,
    }
}

/// Receiving end of one subscriber. Dropping it unsubscribes.
///
/// At most `capacity` unread snapshots are kept; when more arrive the
/// oldest unread ones are skipped and counted as dropped.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    /// Latest snapshot at subscription time, delivered first
    seed: Option<Arc<Snapshot>>,
    receiver: broadcast::Receiver<Arc<Snapshot>>,
    capacity: usize,
    membership: Arc<Membership>,
    diagnostics: Arc<Diagnostics>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next snapshot. Returns `None` once unsubscribed, or once
    /// the publisher is closed and everything before the close was read.
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            if self.membership.unsubscribed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(seed) = self.take_seed() {
                return Some(seed);
            }
            let received = tokio::select! {
                received = self.receiver.recv() => received,
                _ = self.membership.wake.notified() => continue,
            };
            match received {
                Ok(snapshot) => {
                    if let Some(snapshot) = self.admit(snapshot) {
                        return Some(snapshot);
                    }
                }
                Err(RecvError::Lagged(missed)) => self.record_dropped(missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Arc<Snapshot>> {
        if self.membership.unsubscribed.load(Ordering::Acquire) {
            return None;
        }
        if let Some(seed) = self.take_seed() {
            return Some(seed);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(snapshot) => {
                    if let Some(snapshot) = self.admit(snapshot) {
                        return Some(snapshot);
                    }
                }
                Err(TryRecvError::Lagged(missed)) => self.record_dropped(missed),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Snapshots this subscriber lost to queue overflow.
    pub fn dropped(&self) -> u64 {
        self.membership.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.membership.closed.load(Ordering::Acquire)
    }

    /// The seed counts against the queue like any other unread snapshot.
    fn take_seed(&mut self) -> Option<Arc<Snapshot>> {
        let seed = self.seed.take()?;
        if self.receiver.len() >= self.capacity {
            self.record_dropped(1);
            return None;
        }
        Some(seed)
    }

    /// A received snapshot with a full queue of newer ones behind it was
    /// already evicted. The broadcast buffer rounds its size up to a power
    /// of two, so the configured capacity is enforced here.
    fn admit(&mut self, snapshot: Arc<Snapshot>) -> Option<Arc<Snapshot>> {
        if self.receiver.len() >= self.capacity {
            self.record_dropped(1);
            return None;
        }
        Some(snapshot)
    }

    fn record_dropped(&self, count: u64) {
        self.membership.dropped.fetch_add(count, Ordering::Relaxed);
        Diagnostics::add(&self.diagnostics.snapshots_dropped, count);
        debug!(subscription = self.id, dropped = count, "Subscriber lagging, skipped oldest snapshots");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            unregister(&registry, self.id);
        }
    }
}
