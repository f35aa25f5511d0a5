//! Fan-out of payloads to a channel's viewers
//!
//! A broadcast snapshots the subscriber set, encodes the payload once and
//! delivers to every viewer concurrently. No lock is held while delivering.
//! Viewers that fail (closed, timed out, or already released by their owner)
//! are removed afterwards in a single write section and then evicted, so
//! their owners close the connection.

use std::sync::Weak;
use std::time::Duration;

use futures::future::join_all;

use super::frame::OutboundFrame;
use super::store::ChannelRegistry;
use super::viewer::{Viewer, ViewerId};
use crate::error::DeliveryError;
use crate::payload::{ChannelKey, Payload};

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Viewers that accepted the payload
    pub delivered: usize,
    /// Viewers removed because delivery failed
    pub pruned: usize,
}

impl ChannelRegistry {
    /// Deliver a payload to every viewer of a channel
    ///
    /// Each viewer gets at most `delivery_timeout`; a slow or broken viewer
    /// never delays the others beyond that bound.
    pub async fn broadcast(&self, key: &ChannelKey, payload: &Payload) -> BroadcastReport {
        let snapshot = match self.subscribers.read().await.get(key) {
            Some(set) => set.snapshot(),
            None => return BroadcastReport::default(),
        };

        if snapshot.is_empty() {
            return BroadcastReport::default();
        }

        let frames = OutboundFrame::encode(payload);
        let timeout = self.config.delivery_timeout;

        let results = join_all(snapshot.iter().map(|(id, viewer)| {
            let frames = &frames;
            async move { (*id, deliver_timed(viewer, frames, timeout).await) }
        }))
        .await;

        let mut failed: Vec<ViewerId> = Vec::new();
        for (id, result) in results {
            if let Err(e) = result {
                tracing::debug!(
                    channel = %key,
                    viewer = %id,
                    error = %e,
                    "Delivery failed, pruning viewer"
                );
                failed.push(id);
            }
        }

        let report = BroadcastReport {
            delivered: snapshot.len() - failed.len(),
            pruned: failed.len(),
        };

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            if let Some(set) = subscribers.get_mut(key) {
                for id in &failed {
                    set.remove(*id);
                }
                if set.is_empty() {
                    subscribers.remove(key);
                }
            }
            drop(subscribers);

            // A timed-out viewer may still be connected; its owner must close it
            for (id, viewer) in &snapshot {
                if failed.contains(id) {
                    if let Some(viewer) = viewer.upgrade() {
                        viewer.evict();
                    }
                }
            }
        }

        tracing::trace!(
            channel = %key,
            payload = payload.type_name(),
            delivered = report.delivered,
            pruned = report.pruned,
            "Broadcast"
        );

        report
    }
}

/// Deliver frames to one viewer within a time bound
///
/// A viewer whose owner already dropped it counts as closed.
pub(crate) async fn deliver_timed(
    viewer: &Weak<dyn Viewer>,
    frames: &[OutboundFrame],
    timeout: Duration,
) -> Result<(), DeliveryError> {
    let viewer = viewer.upgrade().ok_or(DeliveryError::Closed)?;

    match tokio::time::timeout(timeout, viewer.deliver(frames)).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::payload::{CameraFrame, Source, TelemetryEvent};
    use crate::registry::{ChannelViewer, RegistryConfig};

    /// Viewer that never completes a delivery
    struct StalledViewer {
        id: ViewerId,
    }

    #[async_trait]
    impl Viewer for StalledViewer {
        fn id(&self) -> ViewerId {
            self.id
        }

        async fn deliver(&self, _frames: &[OutboundFrame]) -> Result<(), DeliveryError> {
            std::future::pending().await
        }
    }

    /// Viewer that counts deliveries
    struct CountingViewer {
        id: ViewerId,
        count: AtomicUsize,
    }

    #[async_trait]
    impl Viewer for CountingViewer {
        fn id(&self) -> ViewerId {
            self.id
        }

        async fn deliver(&self, _frames: &[OutboundFrame]) -> Result<(), DeliveryError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scan_payload() -> Payload {
        Payload::Telemetry(
            TelemetryEvent::parse(r#"{"type":"scan","data":{"ranges":[1.0,2.0]}}"#).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_broadcast_without_viewers() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::telemetry(Source::Real, "tb3_1");

        let report = registry.broadcast(&key, &scan_payload()).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_one_broken_viewer_is_pruned() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::telemetry(Source::Real, "tb3_1");

        let mut receivers = Vec::new();
        let mut viewers: Vec<Arc<dyn Viewer>> = Vec::new();
        for _ in 0..4 {
            let (viewer, rx) = ChannelViewer::new(4);
            let viewer: Arc<dyn Viewer> = Arc::new(viewer);
            registry.subscribe(&key, &viewer).await;
            viewers.push(viewer);
            receivers.push(rx);
        }

        // Break the last viewer's connection
        receivers.pop();

        let report = registry.broadcast(&key, &scan_payload()).await;
        assert_eq!(report.delivered, 3);
        assert_eq!(report.pruned, 1);
        assert_eq!(registry.subscriber_count(&key).await, 3);

        for rx in receivers.iter_mut() {
            assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Text(_))));
        }

        // Nothing else gets pruned on the next broadcast
        let report = registry.broadcast(&key, &scan_payload()).await;
        assert_eq!(report, BroadcastReport { delivered: 3, pruned: 0 });
    }

    #[tokio::test]
    async fn test_released_viewer_is_pruned() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::camera(Source::Simulated, "tb3_1");

        let (viewer, _rx) = ChannelViewer::new(4);
        let viewer: Arc<dyn Viewer> = Arc::new(viewer);
        registry.subscribe(&key, &viewer).await;
        drop(viewer);

        let frame = Payload::Frame(CameraFrame::new(Bytes::from_static(b"jpeg")));
        let report = registry.broadcast(&key, &frame).await;

        assert_eq!(report, BroadcastReport { delivered: 0, pruned: 1 });
        assert_eq!(registry.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_stalled_viewer_times_out() {
        let config = RegistryConfig::default().delivery_timeout(Duration::from_millis(50));
        let registry = ChannelRegistry::with_config(config);
        let key = ChannelKey::telemetry(Source::Real, "tb3_1");

        let stalled: Arc<dyn Viewer> = Arc::new(StalledViewer { id: ViewerId::next() });
        let counting = Arc::new(CountingViewer {
            id: ViewerId::next(),
            count: AtomicUsize::new(0),
        });
        let counting_dyn: Arc<dyn Viewer> = counting.clone();

        registry.subscribe(&key, &stalled).await;
        registry.subscribe(&key, &counting_dyn).await;

        let report = registry.broadcast(&key, &scan_payload()).await;

        assert_eq!(report, BroadcastReport { delivered: 1, pruned: 1 });
        assert_eq!(counting.count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.subscriber_count(&key).await, 1);
    }

    #[tokio::test]
    async fn test_timed_out_viewer_is_evicted() {
        let config = RegistryConfig::default().delivery_timeout(Duration::from_millis(20));
        let registry = ChannelRegistry::with_config(config);
        let key = ChannelKey::telemetry(Source::Real, "tb3_1");

        let (viewer, mut rx) = ChannelViewer::new(1);
        let viewer = Arc::new(viewer);
        let viewer_dyn: Arc<dyn Viewer> = viewer.clone();
        registry.subscribe(&key, &viewer_dyn).await;

        // The first broadcast fills the buffer, the second one stalls
        let report = registry.broadcast(&key, &scan_payload()).await;
        assert_eq!(report, BroadcastReport { delivered: 1, pruned: 0 });
        let report = registry.broadcast(&key, &scan_payload()).await;
        assert_eq!(report, BroadcastReport { delivered: 0, pruned: 1 });

        // Still connected, but its owner is told to close it
        assert!(rx.try_recv().is_ok());
        tokio::time::timeout(Duration::from_secs(1), viewer.evicted())
            .await
            .expect("pruned viewer was not evicted");
        assert_eq!(registry.subscriber_count(&key).await, 0);
    }

    #[tokio::test]
    async fn test_healthy_viewers_are_not_evicted() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::telemetry(Source::Real, "tb3_1");

        let (viewer, _rx) = ChannelViewer::new(4);
        let viewer = Arc::new(viewer);
        let viewer_dyn: Arc<dyn Viewer> = viewer.clone();
        registry.subscribe(&key, &viewer_dyn).await;

        registry.broadcast(&key, &scan_payload()).await;

        let evicted = tokio::time::timeout(Duration::from_millis(50), viewer.evicted()).await;
        assert!(evicted.is_err());
    }
}
