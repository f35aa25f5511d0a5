//! Bounded FIFO in front of the persistence workers
//!
//! When the FIFO is full the incoming item is discarded and everything
//! already queued is kept (drop-newest). Producers never wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};

use super::EnqueueOutcome;

/// Shutdown flag shared by both halves
#[derive(Debug, Default)]
struct Shutdown {
    closed: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Create a history FIFO with the given capacity (at least 1)
pub fn history_queue<T>(capacity: usize) -> (HistoryQueue<T>, HistoryReceiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let shutdown = Arc::new(Shutdown::default());
    (
        HistoryQueue {
            tx,
            capacity,
            shutdown: Arc::clone(&shutdown),
        },
        HistoryReceiver {
            rx: Arc::new(Mutex::new(rx)),
            shutdown,
        },
    )
}

/// Sending half, cloned into every ingest path
#[derive(Debug)]
pub struct HistoryQueue<T> {
    tx: mpsc::Sender<T>,
    capacity: usize,
    shutdown: Arc<Shutdown>,
}

impl<T> Clone for HistoryQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<T> HistoryQueue<T> {
    /// Queue an item without waiting
    pub fn try_push(&self, item: T) -> EnqueueOutcome {
        if self.shutdown.is_closed() {
            return EnqueueOutcome::Closed;
        }

        match self.tx.try_send(item) {
            Ok(()) => EnqueueOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_closed() || self.tx.is_closed()
    }
}

/// Receiving half, shared by all persistence workers
#[derive(Debug)]
pub struct HistoryReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    shutdown: Arc<Shutdown>,
}

impl<T> Clone for HistoryReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<T> HistoryReceiver<T> {
    /// Wait for the next item
    ///
    /// Returns `None` once the queue is closed and drained, or once every
    /// sender is gone.
    pub async fn recv(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;

        loop {
            let notified = self.shutdown.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shutdown.is_closed() {
                // Buffered items are still returned, then None
                rx.close();
                return rx.recv().await;
            }

            tokio::select! {
                item = rx.recv() => return item,
                _ = &mut notified => continue,
            }
        }
    }

    /// Stop accepting new items and wake waiting consumers
    ///
    /// Items already queued are still handed out by `recv`.
    pub fn close(&self) {
        self.shutdown.closed.store(true, Ordering::Release);
        self.shutdown.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let (queue, receiver) = history_queue(2);

        assert_eq!(queue.try_push(1), EnqueueOutcome::Accepted);
        assert_eq!(queue.try_push(2), EnqueueOutcome::Accepted);
        assert_eq!(queue.try_push(3), EnqueueOutcome::Dropped);
        assert_eq!(queue.len(), 2);

        assert_eq!(receiver.recv().await, Some(1));
        assert_eq!(receiver.recv().await, Some(2));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_consumers_share_items() {
        let (queue, receiver) = history_queue(8);
        let other = receiver.clone();

        for i in 0..4 {
            queue.try_push(i);
        }

        let mut seen = vec![
            receiver.recv().await.unwrap(),
            other.recv().await.unwrap(),
            receiver.recv().await.unwrap(),
            other.recv().await.unwrap(),
        ];
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (queue, receiver) = history_queue(4);
        queue.try_push("a");

        receiver.close();

        assert_eq!(queue.try_push("b"), EnqueueOutcome::Closed);
        assert_eq!(receiver.recv().await, Some("a"));
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_idle_consumers() {
        let (_queue, receiver) = history_queue::<u8>(4);
        let waiting = tokio::spawn({
            let receiver = receiver.clone();
            async move { receiver.recv().await }
        });
        tokio::task::yield_now().await;

        receiver.close();

        assert_eq!(waiting.await.unwrap(), None);
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_senders_dropped_ends_receiver() {
        let (queue, receiver) = history_queue::<u8>(4);
        drop(queue);
        assert_eq!(receiver.recv().await, None);
    }
}
