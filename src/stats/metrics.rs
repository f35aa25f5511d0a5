//! Statistics and metrics for the hub

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Hub-wide counters
///
/// Updated lock-free from ingest, broadcast and the workers.
#[derive(Debug)]
pub struct HubStats {
    started_at: Instant,

    /// Telemetry messages accepted
    pub telemetry_received: AtomicU64,
    /// Camera frames accepted
    pub frames_received: AtomicU64,
    /// Producer messages that failed to parse
    pub malformed_dropped: AtomicU64,
    /// Successful per-viewer deliveries
    pub deliveries: AtomicU64,
    /// Viewers removed after a failed delivery
    pub viewers_pruned: AtomicU64,

    /// Frames handed to the inference slot
    pub inference_enqueued: AtomicU64,
    /// Frames overwritten in the inference slot before processing
    pub inference_coalesced: AtomicU64,
    /// Frames whose inference call failed or timed out
    pub inference_dropped: AtomicU64,
    /// Enriched frames broadcast
    pub inference_broadcasts: AtomicU64,

    /// Events queued for persistence
    pub history_enqueued: AtomicU64,
    /// Events dropped because the FIFO was full
    pub history_dropped: AtomicU64,
    /// Events not persisted because they failed validation
    pub history_skipped: AtomicU64,
    /// Rows written
    pub history_persisted: AtomicU64,
    /// Failed (rolled back) writes
    pub storage_failures: AtomicU64,

    /// Commands delivered to a robot's control link
    pub commands_sent: AtomicU64,
    /// Commands refused (no link) or lost (link failed)
    pub commands_failed: AtomicU64,

    /// Panics caught in workers
    pub worker_panics: AtomicU64,
}

impl HubStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            telemetry_received: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            malformed_dropped: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            viewers_pruned: AtomicU64::new(0),
            inference_enqueued: AtomicU64::new(0),
            inference_coalesced: AtomicU64::new(0),
            inference_dropped: AtomicU64::new(0),
            inference_broadcasts: AtomicU64::new(0),
            history_enqueued: AtomicU64::new(0),
            history_dropped: AtomicU64::new(0),
            history_skipped: AtomicU64::new(0),
            history_persisted: AtomicU64::new(0),
            storage_failures: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            worker_panics: AtomicU64::new(0),
        }
    }

    /// Increment a counter by one
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment a counter by `n`
    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Time since the hub started
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        StatsSnapshot {
            uptime: self.uptime(),
            telemetry_received: load(&self.telemetry_received),
            frames_received: load(&self.frames_received),
            malformed_dropped: load(&self.malformed_dropped),
            deliveries: load(&self.deliveries),
            viewers_pruned: load(&self.viewers_pruned),
            inference_enqueued: load(&self.inference_enqueued),
            inference_coalesced: load(&self.inference_coalesced),
            inference_dropped: load(&self.inference_dropped),
            inference_broadcasts: load(&self.inference_broadcasts),
            history_enqueued: load(&self.history_enqueued),
            history_dropped: load(&self.history_dropped),
            history_skipped: load(&self.history_skipped),
            history_persisted: load(&self.history_persisted),
            storage_failures: load(&self.storage_failures),
            commands_sent: load(&self.commands_sent),
            commands_failed: load(&self.commands_failed),
            worker_panics: load(&self.worker_panics),
        }
    }

    /// Spawn a task that logs a snapshot every `interval`
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_logger(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let stats = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let s = stats.snapshot();
                tracing::info!(
                    uptime_secs = s.uptime.as_secs(),
                    telemetry = s.telemetry_received,
                    frames = s.frames_received,
                    malformed = s.malformed_dropped,
                    deliveries = s.deliveries,
                    pruned = s.viewers_pruned,
                    inference_dropped = s.inference_dropped,
                    history_dropped = s.history_dropped,
                    persisted = s.history_persisted,
                    storage_failures = s.storage_failures,
                    commands = s.commands_sent,
                    "Hub stats"
                );
            }
        })
    }
}

impl Default for HubStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of [`HubStats`] at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub telemetry_received: u64,
    pub frames_received: u64,
    pub malformed_dropped: u64,
    pub deliveries: u64,
    pub viewers_pruned: u64,
    pub inference_enqueued: u64,
    pub inference_coalesced: u64,
    pub inference_dropped: u64,
    pub inference_broadcasts: u64,
    pub history_enqueued: u64,
    pub history_dropped: u64,
    pub history_skipped: u64,
    pub history_persisted: u64,
    pub storage_failures: u64,
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub worker_panics: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats_are_zero() {
        let snapshot = HubStats::new().snapshot();
        assert_eq!(
            snapshot,
            StatsSnapshot {
                uptime: snapshot.uptime,
                ..StatsSnapshot::default()
            }
        );
    }

    #[test]
    fn test_counters() {
        let stats = HubStats::new();

        HubStats::incr(&stats.telemetry_received);
        HubStats::incr(&stats.telemetry_received);
        HubStats::add(&stats.deliveries, 3);
        HubStats::add(&stats.viewers_pruned, 0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.telemetry_received, 2);
        assert_eq!(snapshot.deliveries, 3);
        assert_eq!(snapshot.viewers_pruned, 0);
    }
}
