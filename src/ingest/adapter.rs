//! Producer message normalization and routing
//!
//! Every producer message goes through [`IngestAdapter::ingest`]:
//!
//! 1. normalize into a [`Payload`] (parse, clamp, decode)
//! 2. store it as the channel's latest value
//! 3. broadcast it to the channel's viewers
//! 4. hand it to the background workers without waiting
//!
//! Steps 2-4 run in that order for every message, so a viewer subscribing
//! between steps 2 and 3 is seeded with the value about to be broadcast.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::IngestError;
use crate::payload::{CameraFrame, ChannelKey, Payload, StreamKind, TelemetryEvent};
use crate::queue::{EnqueueOutcome, HistoryQueue, LatestQueue, QueueItem};
use crate::registry::{BroadcastReport, ChannelRegistry};
use crate::stats::HubStats;

/// Raw message received from a producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    Binary(Bytes),
}

/// What happened to one ingested message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub broadcast: BroadcastReport,
    /// Outcome of the worker hand-off, if a worker handles this stream kind
    pub enqueued: Option<EnqueueOutcome>,
}

/// Entry point for producer messages
pub struct IngestAdapter {
    registry: Arc<ChannelRegistry>,
    inference: Option<Arc<LatestQueue<QueueItem>>>,
    history: Option<HistoryQueue<QueueItem>>,
    stats: Arc<HubStats>,
}

impl IngestAdapter {
    /// Create an adapter that only broadcasts
    pub fn new(registry: Arc<ChannelRegistry>, stats: Arc<HubStats>) -> Self {
        Self {
            registry,
            inference: None,
            history: None,
            stats,
        }
    }

    /// Hand camera frames to an inference worker through `queue`
    pub fn with_inference(mut self, queue: Arc<LatestQueue<QueueItem>>) -> Self {
        self.inference = Some(queue);
        self
    }

    /// Hand telemetry to persistence workers through `queue`
    pub fn with_history(mut self, queue: HistoryQueue<QueueItem>) -> Self {
        self.history = Some(queue);
        self
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Turn a raw producer message into a payload for `key`'s stream kind
    ///
    /// Pure: touches no shared state.
    pub fn normalize(key: &ChannelKey, message: InboundMessage) -> Result<Payload, IngestError> {
        match (key.kind, message) {
            (StreamKind::Telemetry, InboundMessage::Text(text)) => {
                TelemetryEvent::parse(&text).map(Payload::Telemetry)
            }
            (StreamKind::Telemetry, InboundMessage::Binary(_)) => {
                Err(IngestError::UnexpectedBinary)
            }
            (StreamKind::Camera, InboundMessage::Binary(data)) => {
                Ok(Payload::Frame(CameraFrame::new(data)))
            }
            (StreamKind::Camera, InboundMessage::Text(text)) => {
                CameraFrame::from_envelope(&text).map(Payload::Frame)
            }
        }
    }

    /// Normalize and publish one producer message
    ///
    /// A malformed message is counted, logged and returned as an error; the
    /// caller keeps the producer connection open.
    pub async fn ingest(
        &self,
        key: &ChannelKey,
        message: InboundMessage,
    ) -> Result<IngestReport, IngestError> {
        let payload = match Self::normalize(key, message) {
            Ok(payload) => payload,
            Err(e) => {
                HubStats::incr(&self.stats.malformed_dropped);
                tracing::warn!(channel = %key, error = %e, "Dropping malformed message");
                return Err(e);
            }
        };

        Ok(self.publish(key, payload).await)
    }

    /// Publish an already-normalized payload
    pub async fn publish(&self, key: &ChannelKey, payload: Payload) -> IngestReport {
        match &payload {
            Payload::Telemetry(_) => HubStats::incr(&self.stats.telemetry_received),
            Payload::Frame(_) => HubStats::incr(&self.stats.frames_received),
        }

        self.registry.set_latest(key, payload.clone()).await;

        let broadcast = self.registry.broadcast(key, &payload).await;
        HubStats::add(&self.stats.deliveries, broadcast.delivered as u64);
        HubStats::add(&self.stats.viewers_pruned, broadcast.pruned as u64);

        let enqueued = self.enqueue(key, payload);

        IngestReport {
            broadcast,
            enqueued,
        }
    }

    fn enqueue(&self, key: &ChannelKey, payload: Payload) -> Option<EnqueueOutcome> {
        match payload {
            Payload::Frame(_) => {
                let queue = self.inference.as_ref()?;
                let outcome = queue.push(QueueItem::new(key.clone(), payload));
                match outcome {
                    EnqueueOutcome::Accepted => HubStats::incr(&self.stats.inference_enqueued),
                    EnqueueOutcome::Coalesced => {
                        HubStats::incr(&self.stats.inference_enqueued);
                        HubStats::incr(&self.stats.inference_coalesced);
                        tracing::trace!(channel = %key, "Replaced pending inference frame");
                    }
                    EnqueueOutcome::Dropped | EnqueueOutcome::Closed => {}
                }
                Some(outcome)
            }
            Payload::Telemetry(_) => {
                let queue = self.history.as_ref()?;
                let outcome = queue.try_push(QueueItem::new(key.clone(), payload));
                match outcome {
                    EnqueueOutcome::Accepted | EnqueueOutcome::Coalesced => {
                        HubStats::incr(&self.stats.history_enqueued)
                    }
                    EnqueueOutcome::Dropped => {
                        HubStats::incr(&self.stats.history_dropped);
                        tracing::debug!(
                            channel = %key,
                            capacity = queue.capacity(),
                            "History queue full, dropping event"
                        );
                    }
                    EnqueueOutcome::Closed => {}
                }
                Some(outcome)
            }
        }
    }
}
