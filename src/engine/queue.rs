//! Per-partition wait queue for requests that arrive while a policy is exhausted.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::decision::Lease;
use crate::policy::{QueueOptions, QueueOrder};

/// A queued request, woken by sending it its lease.
#[derive(Debug)]
pub(crate) struct Waiter {
    id: u64,
    tx: oneshot::Sender<Lease>,
}

impl Waiter {
    /// Hand the waiter its lease. Returns `false` if it already gave up.
    pub(crate) fn wake(self, lease: Lease) -> bool {
        self.tx.send(lease).is_ok()
    }
}

/// Bounded queue of waiters for one partition.
#[derive(Debug)]
pub(crate) struct WaitQueue {
    limit: usize,
    order: QueueOrder,
    entries: VecDeque<Waiter>,
    next_id: u64,
}

/// Result of trying to join a queue.
#[derive(Debug)]
pub(crate) enum Enqueued {
    /// Joined; the receiver resolves with the waiter's lease.
    Joined {
        id: u64,
        rx: oneshot::Receiver<Lease>,
        /// Oldest waiter pushed out to make room (newest-first queues only).
        evicted: Option<Waiter>,
    },
    /// Queue full (or disabled) and the newcomer is the one turned away.
    Full,
}

impl WaitQueue {
    pub(crate) fn new(options: &QueueOptions) -> Self {
        Self {
            limit: options.limit,
            order: options.order,
            entries: VecDeque::with_capacity(options.limit.min(16)),
            next_id: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop waiters whose futures were cancelled.
    pub(crate) fn prune(&mut self) {
        self.entries.retain(|w| !w.tx.is_closed());
    }

    /// Add a waiter, honoring the queue limit and order.
    pub(crate) fn push(&mut self) -> Enqueued {
        if self.limit == 0 {
            return Enqueued::Full;
        }

        self.prune();
        let mut evicted = None;
        if self.entries.len() >= self.limit {
            match self.order {
                QueueOrder::OldestFirst => return Enqueued::Full,
                QueueOrder::NewestFirst => evicted = self.entries.pop_front(),
            }
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let (tx, rx) = oneshot::channel();
        self.entries.push_back(Waiter { id, tx });
        Enqueued::Joined { id, rx, evicted }
    }

    /// Next waiter to release.
    pub(crate) fn pop_next(&mut self) -> Option<Waiter> {
        match self.order {
            QueueOrder::OldestFirst => self.entries.pop_front(),
            QueueOrder::NewestFirst => self.entries.pop_back(),
        }
    }

    /// Remove a waiter by id. Returns `false` if it was already released.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|w| w.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn options(limit: usize, order: QueueOrder) -> QueueOptions {
        QueueOptions {
            limit,
            order,
            timeout: None,
        }
    }

    fn join(queue: &mut WaitQueue) -> (u64, oneshot::Receiver<Lease>, Option<Waiter>) {
        match queue.push() {
            Enqueued::Joined { id, rx, evicted } => (id, rx, evicted),
            Enqueued::Full => panic!("queue unexpectedly full"),
        }
    }

    #[test]
    fn test_disabled_queue_is_full() {
        let mut queue = WaitQueue::new(&options(0, QueueOrder::OldestFirst));
        assert!(matches!(queue.push(), Enqueued::Full));
    }

    #[test]
    fn test_oldest_first() {
        let mut queue = WaitQueue::new(&options(2, QueueOrder::OldestFirst));
        let (first, _rx1, _) = join(&mut queue);
        let (_second, _rx2, _) = join(&mut queue);
        assert!(matches!(queue.push(), Enqueued::Full));

        assert_eq!(queue.pop_next().map(|w| w.id), Some(first));
    }

    #[test]
    fn test_newest_first_evicts_oldest() {
        let mut queue = WaitQueue::new(&options(1, QueueOrder::NewestFirst));
        let (first, mut rx1, _) = join(&mut queue);
        let (second, _rx2, evicted) = join(&mut queue);

        let evicted = evicted.unwrap();
        assert_eq!(evicted.id, first);
        assert!(evicted.wake(Lease::rejected(1, Duration::from_secs(1), Duration::from_secs(1))));
        assert!(!rx1.try_recv().unwrap().granted);

        assert_eq!(queue.pop_next().map(|w| w.id), Some(second));
    }

    #[test]
    fn test_cancelled_waiters_are_pruned() {
        let mut queue = WaitQueue::new(&options(2, QueueOrder::OldestFirst));
        let (_, rx1, _) = join(&mut queue);
        let (_, _rx2, _) = join(&mut queue);
        drop(rx1);

        queue.prune();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut queue = WaitQueue::new(&options(2, QueueOrder::OldestFirst));
        let (id, _rx, _) = join(&mut queue);
        assert!(queue.remove(id));
        assert!(!queue.remove(id));
        assert!(queue.is_empty());
    }
}
