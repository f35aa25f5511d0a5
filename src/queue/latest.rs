//! Single-slot "latest only" queue
//!
//! Used in front of the inference worker. Producers never wait: a push
//! overwrites whatever is still unprocessed, so the worker always picks up
//! the freshest frame and a slow inference service costs dropped frames,
//! never memory or ingest latency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::EnqueueOutcome;

/// Single-slot queue where the newest item wins
#[derive(Debug)]
pub struct LatestQueue<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
    closed: AtomicBool,
    /// Items overwritten before a consumer took them
    replaced: AtomicU64,
}

impl<T> LatestQueue<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            replaced: AtomicU64::new(0),
        }
    }

    // The slot is only ever swapped, so a poisoned lock still holds a
    // consistent value.
    fn slot(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put an item in the slot, replacing any unprocessed one
    pub fn push(&self, item: T) -> EnqueueOutcome {
        if self.is_closed() {
            return EnqueueOutcome::Closed;
        }

        let displaced = self.slot().replace(item).is_some();
        self.notify.notify_one();

        if displaced {
            self.replaced.fetch_add(1, Ordering::Relaxed);
            EnqueueOutcome::Coalesced
        } else {
            EnqueueOutcome::Accepted
        }
    }

    /// Take the current item without waiting
    pub fn try_recv(&self) -> Option<T> {
        self.slot().take()
    }

    /// Wait for an item
    ///
    /// Returns `None` once the queue is closed and empty. An item pushed
    /// before `close` is still handed out.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_recv() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }

            notified.await;
        }
    }

    /// Replace `first` with a newer item if one arrived meanwhile
    ///
    /// Returns the item to process and how many were skipped to get it.
    pub fn drain_latest(&self, first: T) -> (T, usize) {
        match self.try_recv() {
            Some(newer) => (newer, 1),
            None => (first, 0),
        }
    }

    /// Stop accepting items and wake every waiting consumer
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.slot().is_none()
    }

    /// Total number of items overwritten before being processed
    pub fn replaced(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }
}

impl<T> Default for LatestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;

    #[test]
    fn test_push_coalesces() {
        let queue = LatestQueue::new();

        assert_eq!(queue.push(1), EnqueueOutcome::Accepted);
        assert_eq!(queue.push(2), EnqueueOutcome::Coalesced);
        assert_eq!(queue.push(3), EnqueueOutcome::Coalesced);

        assert_eq!(queue.try_recv(), Some(3));
        assert_eq!(queue.try_recv(), None);
        assert_eq!(queue.replaced(), 2);
    }

    #[test]
    fn test_recv_waits_for_push() {
        let queue = LatestQueue::new();
        let mut recv = task::spawn(queue.recv());

        assert_pending!(recv.poll());

        queue.push("frame");
        assert!(recv.is_woken());
        assert_ready_eq!(recv.poll(), Some("frame"));
    }

    #[test]
    fn test_close_wakes_consumer() {
        let queue: LatestQueue<u32> = LatestQueue::new();
        let mut recv = task::spawn(queue.recv());

        assert_pending!(recv.poll());

        queue.close();
        assert!(recv.is_woken());
        assert_ready_eq!(recv.poll(), None);
        assert_eq!(queue.push(7), EnqueueOutcome::Closed);
    }

    #[tokio::test]
    async fn test_close_hands_out_pending_item() {
        let queue = LatestQueue::new();
        queue.push(5);
        queue.close();

        assert_eq!(queue.recv().await, Some(5));
        assert_eq!(queue.recv().await, None);
    }

    #[test]
    fn test_drain_latest() {
        let queue = LatestQueue::new();

        assert_eq!(queue.drain_latest(1), (1, 0));

        queue.push(2);
        assert_eq!(queue.drain_latest(1), (2, 1));
        assert!(queue.is_empty());
    }
}
