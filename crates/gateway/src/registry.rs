//! The set of live stream subscribers.
//!
//! The stream worker broadcasts into the registry while HTTP handlers add and
//! remove members. The lock is held only to snapshot members and to apply
//! removals, never while pushing, so a slow subscriber cannot stall the worker
//! or other subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

pub type SubscriberId = u64;

/// A serialized stream message, shared read-only across subscribers.
pub type SharedMessage = Arc<str>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    #[error("subscriber queue is full")]
    Full,

    #[error("subscriber disconnected")]
    Closed,
}

/// Receives broadcast messages. `push` must not block.
pub trait Subscriber: Send + Sync {
    fn push(&self, message: SharedMessage) -> Result<(), PushError>;
}

/// Bounded queue drained by a WebSocket connection task.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::Sender<SharedMessage>,
}

impl ChannelSubscriber {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SharedMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn push(&self, message: SharedMessage) -> Result<(), PushError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    members: Mutex<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn members(&self) -> MutexGuard<'_, HashMap<SubscriberId, Arc<dyn Subscriber>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.members().insert(id, subscriber);
        tracing::debug!(subscriber = id, "Subscriber added");
        id
    }

    /// Idempotent.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.members().remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = id, "Subscriber removed");
        }
        removed
    }

    /// Drops every member; channel subscribers see their queue close.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.members());
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Disconnected all subscribers");
        }
    }

    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.members().contains_key(&id)
    }

    /// Pushes `message` to a snapshot of the current members and removes the
    /// ones that failed. Members added during the pass get the next message.
    pub fn broadcast(&self, message: SharedMessage) -> BroadcastReport {
        let snapshot: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .members()
            .iter()
            .map(|(id, sub)| (*id, Arc::clone(sub)))
            .collect();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for (id, subscriber) in snapshot {
            match subscriber.push(Arc::clone(&message)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::debug!(subscriber = id, error = %e, "Dropping subscriber");
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let mut members = self.members();
            for id in &failed {
                members.remove(id);
            }
            report.dropped = failed.len();
        }

        report
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl Subscriber for Counting {
        fn push(&self, _message: SharedMessage) -> Result<(), PushError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing(PushError);

    impl Subscriber for Failing {
        fn push(&self, _message: SharedMessage) -> Result<(), PushError> {
            Err(self.0)
        }
    }

    /// Registers another subscriber from inside a push.
    struct Recruiter {
        registry: Arc<SubscriberRegistry>,
        recruit: Arc<Counting>,
    }

    impl Subscriber for Recruiter {
        fn push(&self, _message: SharedMessage) -> Result<(), PushError> {
            self.registry.add(self.recruit.clone());
            Ok(())
        }
    }

    fn msg(text: &str) -> SharedMessage {
        Arc::from(text)
    }

    #[test]
    fn broadcast_reaches_every_member() {
        let registry = SubscriberRegistry::new();
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        registry.add(a.clone());
        registry.add(b.clone());

        let report = registry.broadcast(msg("hello"));

        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_members_are_removed_after_one_broadcast() {
        let registry = SubscriberRegistry::new();
        let healthy = Arc::new(Counting::default());
        registry.add(healthy.clone());
        let full = registry.add(Arc::new(Failing(PushError::Full)));
        let closed = registry.add(Arc::new(Failing(PushError::Closed)));

        let report = registry.broadcast(msg("frame"));

        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 2 });
        assert!(!registry.contains(full));
        assert!(!registry.contains(closed));
        assert_eq!(registry.len(), 1);

        registry.broadcast(msg("frame"));
        assert_eq!(healthy.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn member_added_during_broadcast_gets_next_message() {
        let registry = Arc::new(SubscriberRegistry::new());
        let recruit = Arc::new(Counting::default());
        let recruiter = registry.add(Arc::new(Recruiter {
            registry: registry.clone(),
            recruit: recruit.clone(),
        }));

        registry.broadcast(msg("first"));
        assert_eq!(recruit.0.load(Ordering::SeqCst), 0);

        registry.remove(recruiter);
        registry.broadcast(msg("second"));
        assert_eq!(recruit.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let id = registry.add(Arc::new(Counting::default()));

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn empty_registry_broadcast_is_a_no_op() {
        let registry = SubscriberRegistry::new();
        assert_eq!(registry.broadcast(msg("x")), BroadcastReport::default());
    }

    #[test]
    fn channel_subscriber_reports_full_and_closed() {
        let (sub, mut rx) = ChannelSubscriber::channel(1);

        assert_eq!(sub.push(msg("one")), Ok(()));
        assert_eq!(sub.push(msg("two")), Err(PushError::Full));
        assert_eq!(rx.try_recv().unwrap().as_ref(), "one");

        drop(rx);
        assert_eq!(sub.push(msg("three")), Err(PushError::Closed));
    }

    #[test]
    fn clear_closes_channel_subscribers() {
        let registry = SubscriberRegistry::new();
        let (sub, mut rx) = ChannelSubscriber::channel(4);
        registry.add(Arc::new(sub));

        registry.clear();

        assert!(registry.is_empty());
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
