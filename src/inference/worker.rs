//! Inference worker
//!
//! Pulls the freshest camera frame from the latest-only slot, runs object
//! detection on it and broadcasts the enriched frame to the channel's
//! viewers. Failures and timeouts only cost that frame.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use super::client::InferenceClient;
use crate::error::InferenceError;
use crate::payload::{Detection, Payload};
use crate::queue::{LatestQueue, QueueItem};
use crate::registry::{BroadcastReport, ChannelRegistry};
use crate::stats::HubStats;
use crate::supervisor::panic_message;

/// Consumer of the inference slot
pub struct InferenceWorker {
    queue: Arc<LatestQueue<QueueItem>>,
    client: Arc<dyn InferenceClient>,
    registry: Arc<ChannelRegistry>,
    stats: Arc<HubStats>,
    timeout: Duration,
}

impl InferenceWorker {
    pub fn new(
        queue: Arc<LatestQueue<QueueItem>>,
        client: Arc<dyn InferenceClient>,
        registry: Arc<ChannelRegistry>,
        stats: Arc<HubStats>,
        timeout: Duration,
    ) -> Self {
        Self {
            queue,
            client,
            registry,
            stats,
            timeout,
        }
    }

    /// Process frames until the queue is closed
    pub async fn run(&self) {
        tracing::info!(timeout_ms = self.timeout.as_millis() as u64, "Inference worker started");

        while let Some(item) = self.queue.recv().await {
            let (item, skipped) = self.queue.drain_latest(item);
            HubStats::add(&self.stats.inference_coalesced, skipped as u64);

            let channel = item.key.clone();
            if let Err(panic) = AssertUnwindSafe(self.process(item)).catch_unwind().await {
                HubStats::incr(&self.stats.worker_panics);
                tracing::error!(
                    channel = %channel,
                    panic = %panic_message(panic.as_ref()),
                    "Inference panicked, frame dropped"
                );
            }
        }

        tracing::info!("Inference worker stopped");
    }

    /// Run detection on one item and broadcast the result
    ///
    /// Returns `None` when the frame was dropped. The enriched frame is not
    /// stored as the channel's latest value.
    pub async fn process(&self, item: QueueItem) -> Option<BroadcastReport> {
        let Payload::Frame(frame) = item.payload else {
            tracing::debug!(channel = %item.key, "Ignoring non-frame inference item");
            return None;
        };

        let detections = match self.infer(frame.data.clone()).await {
            Ok(detections) => detections,
            Err(e) => {
                HubStats::incr(&self.stats.inference_dropped);
                tracing::debug!(channel = %item.key, error = %e, "Inference failed, frame dropped");
                return None;
            }
        };

        tracing::trace!(
            channel = %item.key,
            detections = detections.len(),
            "Inference complete"
        );

        let enriched = Payload::Frame(frame.with_detections(detections));
        let report = self.registry.broadcast(&item.key, &enriched).await;

        HubStats::incr(&self.stats.inference_broadcasts);
        HubStats::add(&self.stats.deliveries, report.delivered as u64);
        HubStats::add(&self.stats.viewers_pruned, report.pruned as u64);

        Some(report)
    }

    async fn infer(&self, image: bytes::Bytes) -> Result<Vec<Detection>, InferenceError> {
        match tokio::time::timeout(self.timeout, self.client.infer(image)).await {
            Ok(result) => {
                result.map(|detections| detections.into_iter().map(Detection::clamped).collect())
            }
            Err(_) => Err(InferenceError::Timeout(self.timeout)),
        }
    }
}
