//! Bounded work queues between ingest and the background workers
//!
//! Ingest never waits on a worker. The inference path uses a single-slot
//! [`LatestQueue`] where a newer frame replaces an unprocessed one; the
//! persistence path uses a bounded [`HistoryQueue`] that drops the incoming
//! item when full.

pub mod history;
pub mod latest;

use chrono::{DateTime, Utc};

pub use history::{history_queue, HistoryQueue, HistoryReceiver};
pub use latest::LatestQueue;

use crate::payload::{ChannelKey, Payload};

/// Unit of work handed to a worker
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub key: ChannelKey,
    pub payload: Payload,
    /// When ingest accepted the message
    pub received_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(key: ChannelKey, payload: Payload) -> Self {
        Self {
            key,
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Item queued
    Accepted,
    /// Item queued, replacing one that was never processed
    Coalesced,
    /// Queue full, item discarded
    Dropped,
    /// Queue shut down, item discarded
    Closed,
}

impl EnqueueOutcome {
    /// Whether the item will reach a worker
    pub fn is_queued(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted | EnqueueOutcome::Coalesced)
    }
}

/// Queue sizing
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Capacity of the persistence FIFO
    pub history_capacity: usize,

    /// Number of persistence workers sharing the FIFO
    pub persistence_workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            persistence_workers: 1,
        }
    }
}

impl QueueConfig {
    /// Set the persistence FIFO capacity (at least 1)
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    /// Set the number of persistence workers (at least 1)
    pub fn persistence_workers(mut self, workers: usize) -> Self {
        self.persistence_workers = workers.max(1);
        self
    }
}
