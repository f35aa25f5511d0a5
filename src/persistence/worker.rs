//! Persistence worker
//!
//! Pulls telemetry from the history FIFO, validates it and appends it to the
//! history store on the blocking thread pool. A failed write is rolled back,
//! logged and discarded; there is no retry.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use super::record::HistoryRecord;
use super::store::HistoryStore;
use crate::queue::{HistoryReceiver, QueueItem};
use crate::stats::HubStats;
use crate::supervisor::panic_message;

/// What happened to one history item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Persisted,
    Skipped,
    Failed,
}

/// One consumer of the history FIFO. Several may share a receiver.
pub struct PersistenceWorker {
    id: usize,
    receiver: HistoryReceiver<QueueItem>,
    store: Arc<dyn HistoryStore>,
    stats: Arc<HubStats>,
}

impl PersistenceWorker {
    pub fn new(
        id: usize,
        receiver: HistoryReceiver<QueueItem>,
        store: Arc<dyn HistoryStore>,
        stats: Arc<HubStats>,
    ) -> Self {
        Self {
            id,
            receiver,
            store,
            stats,
        }
    }

    /// Persist items until the FIFO is closed and drained
    pub async fn run(&self) {
        tracing::info!(worker = self.id, "Persistence worker started");

        while let Some(item) = self.receiver.recv().await {
            let channel = item.key.clone();
            if let Err(panic) = AssertUnwindSafe(self.process(item)).catch_unwind().await {
                HubStats::incr(&self.stats.worker_panics);
                tracing::error!(
                    worker = self.id,
                    channel = %channel,
                    panic = %panic_message(panic.as_ref()),
                    "Persistence panicked, item dropped"
                );
            }
        }

        tracing::info!(worker = self.id, "Persistence worker stopped");
    }

    /// Validate and store one item
    pub async fn process(&self, item: QueueItem) -> PersistOutcome {
        let record = match HistoryRecord::from_item(&item) {
            Ok(record) => record,
            Err(reason) => {
                HubStats::incr(&self.stats.history_skipped);
                tracing::debug!(channel = %item.key, reason = %reason, "Not persisting event");
                return PersistOutcome::Skipped;
            }
        };

        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.append(&record)).await {
            Ok(Ok(())) => {
                HubStats::incr(&self.stats.history_persisted);
                PersistOutcome::Persisted
            }
            Ok(Err(e)) => {
                HubStats::incr(&self.stats.storage_failures);
                tracing::error!(
                    worker = self.id,
                    channel = %item.key,
                    error = %e,
                    "History write failed, rolled back"
                );
                PersistOutcome::Failed
            }
            Err(join_error) => {
                HubStats::incr(&self.stats.storage_failures);
                if join_error.is_panic() {
                    HubStats::incr(&self.stats.worker_panics);
                }
                tracing::error!(
                    worker = self.id,
                    channel = %item.key,
                    error = %join_error,
                    "History write aborted"
                );
                PersistOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::payload::{ChannelKey, Payload, Source, TelemetryEvent};
    use crate::persistence::SqliteHistoryStore;
    use crate::queue::history_queue;

    struct FailingStore;

    impl HistoryStore for FailingStore {
        fn append(&self, _record: &HistoryRecord) -> Result<(), StorageError> {
            Err(StorageError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        }
    }

    struct PanickingStore;

    impl HistoryStore for PanickingStore {
        fn append(&self, _record: &HistoryRecord) -> Result<(), StorageError> {
            panic!("disk on fire");
        }
    }

    fn item(text: &str) -> QueueItem {
        QueueItem::new(
            ChannelKey::telemetry(Source::Real, "tb3_1"),
            Payload::Telemetry(TelemetryEvent::parse(text).unwrap()),
        )
    }

    fn worker(store: Arc<dyn HistoryStore>) -> PersistenceWorker {
        let (_queue, receiver) = history_queue(4);
        PersistenceWorker::new(0, receiver, store, Arc::new(HubStats::new()))
    }

    #[tokio::test]
    async fn test_valid_event_is_persisted() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        let worker = worker(Arc::new(store.clone()));

        let outcome = worker
            .process(item(r#"{"type":"battery","data":{"percentage":64}}"#))
            .await;

        assert_eq!(outcome, PersistOutcome::Persisted);
        let rows = store.recent("tb3_1", 1).unwrap();
        assert_eq!(rows[0].battery_percentage, Some(64.0));
    }

    #[tokio::test]
    async fn test_invalid_event_is_skipped() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        let worker = worker(Arc::new(store.clone()));

        let outcome = worker
            .process(item(r#"{"type":"battery","data":{"percentage":-3}}"#))
            .await;

        assert_eq!(outcome, PersistOutcome::Skipped);
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(worker.stats.snapshot().history_skipped, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_discarded() {
        let worker = worker(Arc::new(FailingStore));

        let outcome = worker
            .process(item(r#"{"type":"scan","data":{"ranges":[1.0]}}"#))
            .await;

        assert_eq!(outcome, PersistOutcome::Failed);
        assert_eq!(worker.stats.snapshot().storage_failures, 1);
    }

    #[tokio::test]
    async fn test_store_panic_does_not_stop_worker() {
        let (queue, receiver) = history_queue(4);
        let stats = Arc::new(HubStats::new());
        let worker = PersistenceWorker::new(1, receiver.clone(), Arc::new(PanickingStore), stats);

        queue.try_push(item(r#"{"type":"battery","data":{"percentage":1}}"#));
        queue.try_push(item(r#"{"type":"battery","data":{"percentage":2}}"#));
        receiver.close();

        worker.run().await;

        let snapshot = worker.stats.snapshot();
        assert_eq!(snapshot.storage_failures, 2);
        assert_eq!(snapshot.worker_panics, 2);
    }

    #[tokio::test]
    async fn test_workers_share_queue() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        let (queue, receiver) = history_queue(16);
        let stats = Arc::new(HubStats::new());

        for i in 0..6 {
            queue.try_push(item(&format!(
                r#"{{"type":"odom","data":{{"position":{{"x":{i},"y":0}},"twist":{{"linear":{{"x":0.1}},"angular":{{"z":0.0}}}}}}}}"#
            )));
        }
        receiver.close();

        let workers: Vec<_> = (0..2)
            .map(|id| {
                let worker = PersistenceWorker::new(
                    id,
                    receiver.clone(),
                    Arc::new(store.clone()),
                    Arc::clone(&stats),
                );
                tokio::spawn(async move { worker.run().await })
            })
            .collect();
        for handle in workers {
            handle.await.unwrap();
        }

        assert_eq!(store.count().unwrap(), 6);
        assert_eq!(stats.snapshot().history_persisted, 6);

        let rows = store.recent("tb3_1", 10).unwrap();
        assert!(rows.iter().all(|row| row.linear_velocity == Some(0.1)));
    }
}
