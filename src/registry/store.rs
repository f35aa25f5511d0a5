//! Channel registry implementation
//!
//! The central registry that tracks which viewers watch which channel and the
//! most recent payload seen on each channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;

use super::broadcast::deliver_timed;
use super::config::RegistryConfig;
use super::entry::{ChannelStats, SubscriberSet};
use super::frame::OutboundFrame;
use super::viewer::{Viewer, ViewerId};
use crate::error::DeliveryError;
use crate::payload::{ChannelKey, Payload};

/// Times a seed is retried without locks before it is delivered under the
/// subscriber write lock
const SEED_ATTEMPTS: usize = 3;

/// Central registry for all channels
///
/// Subscriber sets and latest values live behind separate `RwLock`s so that
/// a `set_latest` never waits on a slow broadcast snapshot and vice versa.
/// Where both are taken, `subscribers` is always locked first.
pub struct ChannelRegistry {
    /// Map of channel key to its viewers
    pub(super) subscribers: RwLock<HashMap<ChannelKey, SubscriberSet>>,

    /// Map of channel key to the last payload ingested on it
    pub(super) latest: RwLock<HashMap<ChannelKey, Payload>>,

    /// Configuration
    pub(super) config: RegistryConfig,
}

impl ChannelRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Add a viewer to a channel, creating the channel if needed
    ///
    /// Subscribing the same viewer twice is a no-op. Only a weak reference
    /// is kept: dropping the last `Arc` ends the subscription.
    pub async fn subscribe(&self, key: &ChannelKey, viewer: &Arc<dyn Viewer>) {
        let mut subscribers = self.subscribers.write().await;
        let set = subscribers.entry(key.clone()).or_default();

        if set.insert(viewer) {
            tracing::info!(
                channel = %key,
                viewer = %viewer.id(),
                subscribers = set.len(),
                "Viewer subscribed"
            );
        }
    }

    /// Subscribe a viewer and send it the channel's cached latest value
    ///
    /// The seed is delivered before the viewer joins the channel, with no
    /// lock held. Joining then re-checks the latest value under the
    /// subscriber write lock; if a newer value arrived in between, that one
    /// is seeded too, so no broadcast is missed and none reaches the viewer
    /// ahead of its seed. After `SEED_ATTEMPTS` changes the newest value is
    /// seeded with the lock held.
    ///
    /// Returns `Ok(true)` if a seed was sent, `Ok(false)` if the channel had
    /// no latest value yet. If a seed cannot be delivered the viewer is not
    /// subscribed.
    pub async fn subscribe_seeded(
        &self,
        key: &ChannelKey,
        viewer: &Arc<dyn Viewer>,
    ) -> Result<bool, DeliveryError> {
        let weak = Arc::downgrade(viewer);
        let mut seeded: Option<Payload> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let current = self.get_latest(key).await;
            if current.is_some() && current != seeded {
                if let Some(payload) = &current {
                    self.seed(key, &weak, payload).await?;
                }
                seeded = current;
            }

            let mut subscribers = self.subscribers.write().await;
            let latest = self.latest.read().await.get(key).cloned();
            if latest != seeded && attempt < SEED_ATTEMPTS {
                continue;
            }
            if latest != seeded {
                // Still moving: seed the newest value with broadcasts held off
                if let Some(payload) = &latest {
                    self.seed(key, &weak, payload).await?;
                }
                seeded = latest;
            }

            let set = subscribers.entry(key.clone()).or_default();
            set.insert(viewer);
            tracing::info!(
                channel = %key,
                viewer = %viewer.id(),
                subscribers = set.len(),
                seed = seeded.as_ref().map(Payload::type_name).unwrap_or("none"),
                "Viewer subscribed"
            );
            return Ok(seeded.is_some());
        }
    }

    async fn seed(
        &self,
        key: &ChannelKey,
        viewer: &Weak<dyn Viewer>,
        payload: &Payload,
    ) -> Result<(), DeliveryError> {
        let frames = OutboundFrame::encode(payload);
        deliver_timed(viewer, &frames, self.config.delivery_timeout)
            .await
            .map_err(|e| {
                tracing::debug!(
                    channel = %key,
                    error = %e,
                    "Seed delivery failed, viewer not subscribed"
                );
                e
            })
    }

    /// Remove a viewer from a channel
    ///
    /// Unknown viewers and channels are ignored. The channel's subscriber
    /// set is dropped once empty.
    pub async fn unsubscribe(&self, key: &ChannelKey, viewer: ViewerId) {
        let mut subscribers = self.subscribers.write().await;

        let Some(set) = subscribers.get_mut(key) else {
            return;
        };

        if set.remove(viewer) {
            let remaining = set.len();
            if remaining == 0 {
                subscribers.remove(key);
            }
            tracing::debug!(
                channel = %key,
                viewer = %viewer,
                subscribers = remaining,
                "Viewer unsubscribed"
            );
        }
    }

    /// Latest payload ingested on a channel
    pub async fn get_latest(&self, key: &ChannelKey) -> Option<Payload> {
        self.latest.read().await.get(key).cloned()
    }

    /// Replace the latest payload of a channel (last write wins)
    pub async fn set_latest(&self, key: &ChannelKey, payload: Payload) {
        self.latest.write().await.insert(key.clone(), payload);
    }

    /// Number of viewers registered on a channel
    pub async fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.subscribers
            .read()
            .await
            .get(key)
            .map(SubscriberSet::len)
            .unwrap_or(0)
    }

    /// Number of known channels (with viewers, a latest value, or both)
    pub async fn channel_count(&self) -> usize {
        self.channels().await.len()
    }

    /// Statistics for every known channel, ordered by key
    pub async fn channels(&self) -> Vec<ChannelStats> {
        let subscribers = self.subscribers.read().await;
        let latest = self.latest.read().await;

        let mut merged: BTreeMap<String, ChannelStats> = BTreeMap::new();
        for (key, set) in subscribers.iter() {
            merged.insert(
                key.to_string(),
                ChannelStats {
                    key: key.clone(),
                    subscriber_count: set.len(),
                    has_latest: latest.contains_key(key),
                },
            );
        }
        for key in latest.keys() {
            merged
                .entry(key.to_string())
                .or_insert_with(|| ChannelStats {
                    key: key.clone(),
                    subscriber_count: 0,
                    has_latest: true,
                });
        }

        merged.into_values().collect()
    }

    /// Run cleanup once
    ///
    /// Drops viewers whose owner released them and channels left without
    /// viewers. Returns the number of viewers removed.
    pub async fn reap(&self) -> usize {
        let mut subscribers = self.subscribers.write().await;

        let mut pruned = 0;
        subscribers.retain(|key, set| {
            let dead = set.prune_dead();
            if dead > 0 {
                tracing::debug!(channel = %key, pruned = dead, "Reaped dead viewers");
            }
            pruned += dead;
            !set.is_empty()
        });

        pruned
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.reap().await;
            }
        })
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::payload::{CameraFrame, Source, TelemetryEvent};
    use crate::registry::ChannelViewer;

    /// Viewer that takes a while to accept each delivery
    struct SlowViewer {
        id: ViewerId,
        delay: Duration,
    }

    #[async_trait]
    impl Viewer for SlowViewer {
        fn id(&self) -> ViewerId {
            self.id
        }

        async fn deliver(&self, _frames: &[OutboundFrame]) -> Result<(), DeliveryError> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    /// Viewer whose first seed races with a newer ingest on its channel
    struct RacingViewer {
        id: ViewerId,
        registry: Arc<ChannelRegistry>,
        key: ChannelKey,
        received: Mutex<Vec<OutboundFrame>>,
    }

    #[async_trait]
    impl Viewer for RacingViewer {
        fn id(&self) -> ViewerId {
            self.id
        }

        async fn deliver(&self, frames: &[OutboundFrame]) -> Result<(), DeliveryError> {
            let first = {
                let mut received = self.received.lock().unwrap();
                received.extend_from_slice(frames);
                received.len() == 1
            };
            if first {
                self.registry.set_latest(&self.key, battery(2.0)).await;
            }
            Ok(())
        }
    }

    fn battery(percentage: f64) -> Payload {
        let text = format!(r#"{{"type":"battery","data":{{"percentage":{percentage}}}}}"#);
        Payload::Telemetry(TelemetryEvent::parse(&text).unwrap())
    }

    fn viewer(buffer: usize) -> (Arc<dyn Viewer>, tokio::sync::mpsc::Receiver<OutboundFrame>) {
        let (viewer, rx) = ChannelViewer::new(buffer);
        let viewer: Arc<dyn Viewer> = Arc::new(viewer);
        (viewer, rx)
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::telemetry(Source::Real, "tb3_1");
        let (v, _rx) = viewer(4);

        registry.subscribe(&key, &v).await;
        registry.subscribe(&key, &v).await;
        assert_eq!(registry.subscriber_count(&key).await, 1);
        assert_eq!(registry.channel_count().await, 1);

        registry.unsubscribe(&key, v.id()).await;
        registry.unsubscribe(&key, v.id()).await;
        assert_eq!(registry.subscriber_count(&key).await, 0);
        assert_eq!(registry.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_latest_last_write_wins() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::telemetry(Source::Simulated, "tb3_1");

        assert!(registry.get_latest(&key).await.is_none());

        registry.set_latest(&key, battery(10.0)).await;
        registry.set_latest(&key, battery(20.0)).await;

        assert_eq!(registry.get_latest(&key).await, Some(battery(20.0)));

        let channels = registry.channels().await;
        assert_eq!(channels.len(), 1);
        assert!(channels[0].has_latest);
        assert_eq!(channels[0].subscriber_count, 0);
    }

    #[tokio::test]
    async fn test_channels_are_partitioned() {
        let registry = ChannelRegistry::new();
        let real = ChannelKey::camera(Source::Real, "tb3_1");
        let sim = ChannelKey::camera(Source::Simulated, "tb3_1");

        registry
            .set_latest(&real, Payload::Frame(CameraFrame::new(Bytes::from_static(b"r"))))
            .await;

        assert!(registry.get_latest(&real).await.is_some());
        assert!(registry.get_latest(&sim).await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_seeded_delivers_latest_first() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::telemetry(Source::Real, "tb3_1");
        registry.set_latest(&key, battery(42.0)).await;

        let (v, mut rx) = viewer(4);
        assert_eq!(registry.subscribe_seeded(&key, &v).await, Ok(true));

        let OutboundFrame::Text(text) = rx.recv().await.unwrap() else {
            panic!("expected text frame");
        };
        assert!(text.contains("42"));
        assert_eq!(registry.subscriber_count(&key).await, 1);
    }

    #[tokio::test]
    async fn test_subscribe_seeded_without_latest() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::telemetry(Source::Real, "tb3_1");

        let (v, mut rx) = viewer(4);
        assert_eq!(registry.subscribe_seeded(&key, &v).await, Ok(false));
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.subscriber_count(&key).await, 1);
    }

    #[tokio::test]
    async fn test_subscribe_seeded_failure_unsubscribes() {
        let config = RegistryConfig::default().delivery_timeout(Duration::from_millis(50));
        let registry = ChannelRegistry::with_config(config);
        let key = ChannelKey::telemetry(Source::Real, "tb3_1");
        registry.set_latest(&key, battery(1.0)).await;

        let (v, rx) = viewer(4);
        drop(rx);

        assert_eq!(
            registry.subscribe_seeded(&key, &v).await,
            Err(DeliveryError::Closed)
        );
        assert_eq!(registry.subscriber_count(&key).await, 0);
    }

    #[tokio::test]
    async fn test_reap_drops_released_viewers() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::telemetry(Source::Real, "tb3_1");
        let (kept, _rx1) = viewer(1);
        let (released, _rx2) = viewer(1);

        registry.subscribe(&key, &kept).await;
        registry.subscribe(&key, &released).await;
        drop(released);

        assert_eq!(registry.reap().await, 1);
        assert_eq!(registry.subscriber_count(&key).await, 1);

        drop(kept);
        assert_eq!(registry.reap().await, 1);
        assert_eq!(registry.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_slow_seed_does_not_block_other_channels() {
        let registry = Arc::new(ChannelRegistry::new());
        let slow_key = ChannelKey::camera(Source::Real, "tb3_1");
        let other_key = ChannelKey::telemetry(Source::Real, "tb3_2");
        registry.set_latest(&slow_key, battery(1.0)).await;

        let (other, mut rx) = viewer(4);
        registry.subscribe(&other_key, &other).await;

        let slow: Arc<dyn Viewer> = Arc::new(SlowViewer {
            id: ViewerId::next(),
            delay: Duration::from_millis(500),
        });
        let seeding = {
            let registry = Arc::clone(&registry);
            let key = slow_key.clone();
            tokio::spawn(async move { registry.subscribe_seeded(&key, &slow).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = tokio::time::timeout(
            Duration::from_millis(200),
            registry.broadcast(&other_key, &battery(3.0)),
        )
        .await
        .expect("broadcast waited on another channel's seed");
        assert_eq!(report.delivered, 1);
        assert!(rx.try_recv().is_ok());

        assert_eq!(seeding.await.unwrap(), Ok(true));
    }

    #[tokio::test]
    async fn test_seed_catches_up_with_newer_latest() {
        let registry = Arc::new(ChannelRegistry::new());
        let key = ChannelKey::telemetry(Source::Simulated, "tb3_1");
        registry.set_latest(&key, battery(1.0)).await;

        let racing = Arc::new(RacingViewer {
            id: ViewerId::next(),
            registry: Arc::clone(&registry),
            key: key.clone(),
            received: Mutex::new(Vec::new()),
        });
        let racing_dyn: Arc<dyn Viewer> = racing.clone();

        assert_eq!(registry.subscribe_seeded(&key, &racing_dyn).await, Ok(true));

        let expected: Vec<OutboundFrame> = OutboundFrame::encode(&battery(1.0))
            .into_iter()
            .chain(OutboundFrame::encode(&battery(2.0)))
            .collect();
        assert_eq!(*racing.received.lock().unwrap(), expected);
        assert_eq!(registry.subscriber_count(&key).await, 1);
    }
}
