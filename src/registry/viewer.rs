//! Viewer handles
//!
//! A viewer is any delivery target for a channel. The registry only holds a
//! weak reference to it: the connection is owned (and eventually closed) by
//! whoever created the viewer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use super::frame::OutboundFrame;
use crate::error::DeliveryError;

static NEXT_VIEWER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique viewer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(u64);

impl ViewerId {
    /// Allocate a fresh identifier
    pub fn next() -> Self {
        ViewerId(NEXT_VIEWER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// A delivery target for channel broadcasts
#[async_trait]
pub trait Viewer: Send + Sync {
    /// Stable identity used for subscribe/unsubscribe
    fn id(&self) -> ViewerId;

    /// Deliver the frames of one broadcast, in order.
    ///
    /// An error means the viewer is dead and should be pruned.
    async fn deliver(&self, frames: &[OutboundFrame]) -> Result<(), DeliveryError>;

    /// Called once the registry has dropped this viewer after a failed
    /// delivery, or replaced it. The owner should close the connection.
    fn evict(&self) {}
}

/// Viewer backed by a bounded channel
///
/// The receiving half is drained by whatever owns the real connection (the
/// WebSocket writer task, or a test). Dropping the receiver makes every
/// further delivery fail with [`DeliveryError::Closed`]; a full buffer makes
/// delivery wait, which the broadcast timeout turns into a prune.
#[derive(Debug)]
pub struct ChannelViewer {
    id: ViewerId,
    tx: mpsc::Sender<OutboundFrame>,
    evicted: Notify,
}

impl ChannelViewer {
    /// Create a viewer and the receiver its frames arrive on
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: ViewerId::next(),
                tx,
                evicted: Notify::new(),
            },
            rx,
        )
    }

    /// Completes once the registry has evicted this viewer
    ///
    /// An eviction that happened before the call is not lost.
    pub async fn evicted(&self) {
        self.evicted.notified().await
    }
}

#[async_trait]
impl Viewer for ChannelViewer {
    fn id(&self) -> ViewerId {
        self.id
    }

    async fn deliver(&self, frames: &[OutboundFrame]) -> Result<(), DeliveryError> {
        for frame in frames {
            self.tx
                .send(frame.clone())
                .await
                .map_err(|_| DeliveryError::Closed)?;
        }
        Ok(())
    }

    fn evict(&self) {
        self.evicted.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_ids_unique() {
        let a = ViewerId::next();
        let b = ViewerId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("viewer-"));
    }

    #[tokio::test]
    async fn test_channel_viewer_delivery() {
        let (viewer, mut rx) = ChannelViewer::new(4);
        let frames = [
            OutboundFrame::Text(Arc::from("a")),
            OutboundFrame::Text(Arc::from("b")),
        ];

        viewer.deliver(&frames).await.unwrap();

        assert_eq!(rx.recv().await, Some(frames[0].clone()));
        assert_eq!(rx.recv().await, Some(frames[1].clone()));
    }

    #[tokio::test]
    async fn test_eviction_is_remembered() {
        let (viewer, _rx) = ChannelViewer::new(1);
        viewer.evict();

        tokio::time::timeout(std::time::Duration::from_secs(1), viewer.evicted())
            .await
            .expect("eviction signal lost");
    }

    #[tokio::test]
    async fn test_channel_viewer_closed() {
        let (viewer, rx) = ChannelViewer::new(4);
        drop(rx);

        let result = viewer.deliver(&[OutboundFrame::Text(Arc::from("x"))]).await;
        assert_eq!(result, Err(DeliveryError::Closed));
    }
}
