//! Per-channel subscriber state
//!
//! This module defines the subscriber set stored in the registry for each
//! channel, and the statistics reported about channels.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use super::viewer::{Viewer, ViewerId};
use crate::payload::ChannelKey;

/// Weak membership set of a channel's viewers
#[derive(Default)]
pub(super) struct SubscriberSet {
    viewers: HashMap<ViewerId, Weak<dyn Viewer>>,
}

impl SubscriberSet {
    /// Add a viewer. Returns false if it was already a member.
    pub(super) fn insert(&mut self, viewer: &Arc<dyn Viewer>) -> bool {
        self.viewers
            .insert(viewer.id(), Arc::downgrade(viewer))
            .is_none()
    }

    /// Remove a viewer. Returns false if it was not a member.
    pub(super) fn remove(&mut self, id: ViewerId) -> bool {
        self.viewers.remove(&id).is_some()
    }

    pub(super) fn len(&self) -> usize {
        self.viewers.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }

    /// Copy of the membership, for delivering without holding the lock
    pub(super) fn snapshot(&self) -> Vec<(ViewerId, Weak<dyn Viewer>)> {
        self.viewers
            .iter()
            .map(|(id, viewer)| (*id, Weak::clone(viewer)))
            .collect()
    }

    /// Drop members whose owner has released them. Returns how many.
    pub(super) fn prune_dead(&mut self) -> usize {
        let before = self.viewers.len();
        self.viewers.retain(|_, viewer| viewer.strong_count() > 0);
        before - self.viewers.len()
    }
}

/// Statistics for a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub key: ChannelKey,
    /// Number of registered viewers
    pub subscriber_count: usize,
    /// Whether a latest value is cached
    pub has_latest: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::viewer::ChannelViewer;

    #[test]
    fn test_insert_idempotent() {
        let (viewer, _rx) = ChannelViewer::new(1);
        let viewer: Arc<dyn Viewer> = Arc::new(viewer);
        let mut set = SubscriberSet::default();

        assert!(set.insert(&viewer));
        assert!(!set.insert(&viewer));
        assert_eq!(set.len(), 1);

        assert!(set.remove(viewer.id()));
        assert!(!set.remove(viewer.id()));
        assert!(set.is_empty());
    }

    #[test]
    fn test_prune_dead() {
        let (alive, _rx1) = ChannelViewer::new(1);
        let (dead, _rx2) = ChannelViewer::new(1);
        let alive: Arc<dyn Viewer> = Arc::new(alive);
        let dead: Arc<dyn Viewer> = Arc::new(dead);

        let mut set = SubscriberSet::default();
        set.insert(&alive);
        set.insert(&dead);
        drop(dead);

        assert_eq!(set.prune_dead(), 1);
        assert_eq!(set.len(), 1);
        assert_eq!(set.snapshot()[0].0, alive.id());
    }
}
