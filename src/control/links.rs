//! Per-robot control links
//!
//! Each robot keeps at most one control connection. A reconnecting robot
//! replaces (and evicts) its previous link; a link whose send fails is
//! dropped so later commands report the robot as disconnected.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::CommandError;
use crate::payload::RobotId;
use crate::registry::broadcast::deliver_timed;
use crate::registry::{OutboundFrame, Viewer, ViewerId};

struct Link {
    id: ViewerId,
    target: Weak<dyn Viewer>,
}

/// Registry of robot control links
pub struct ControlRegistry {
    links: RwLock<HashMap<RobotId, Link>>,
    send_timeout: Duration,
}

impl ControlRegistry {
    /// Create a registry; each command send is bounded by `send_timeout`
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Make `link` the robot's control link
    ///
    /// Returns the id of the link it replaced, which is evicted.
    pub async fn register(&self, robot: &RobotId, link: &Arc<dyn Viewer>) -> Option<ViewerId> {
        let previous = self.links.write().await.insert(
            robot.clone(),
            Link {
                id: link.id(),
                target: Arc::downgrade(link),
            },
        );

        let replaced = previous.filter(|old| old.id != link.id());
        match &replaced {
            Some(old) => {
                tracing::info!(robot = %robot, link = %link.id(), replaced = %old.id, "Control link replaced");
                if let Some(old) = old.target.upgrade() {
                    old.evict();
                }
            }
            None => tracing::info!(robot = %robot, link = %link.id(), "Control link registered"),
        }

        replaced.map(|old| old.id)
    }

    /// Remove the robot's link if it is still `id`
    ///
    /// A link that was already replaced leaves its successor in place.
    pub async fn unregister(&self, robot: &RobotId, id: ViewerId) -> bool {
        let mut links = self.links.write().await;
        if links.get(robot).map(|link| link.id) != Some(id) {
            return false;
        }
        links.remove(robot);
        tracing::info!(robot = %robot, link = %id, "Control link unregistered");
        true
    }

    /// Whether the robot has a live control link
    pub async fn is_connected(&self, robot: &RobotId) -> bool {
        self.links
            .read()
            .await
            .get(robot)
            .is_some_and(|link| link.target.strong_count() > 0)
    }

    /// Robots with a live control link, ordered by id
    pub async fn robots(&self) -> Vec<RobotId> {
        let mut robots: Vec<RobotId> = self
            .links
            .read()
            .await
            .iter()
            .filter(|(_, link)| link.target.strong_count() > 0)
            .map(|(robot, _)| robot.clone())
            .collect();
        robots.sort_by_key(|robot| robot.to_string());
        robots
    }

    /// Send a JSON command over the robot's control link
    ///
    /// A failed send drops (and evicts) the link.
    pub async fn send_command(&self, robot: &RobotId, command: &Value) -> Result<(), CommandError> {
        let (id, target) = match self.links.read().await.get(robot) {
            Some(link) => (link.id, Weak::clone(&link.target)),
            None => {
                tracing::warn!(robot = %robot, "Command for robot without control link");
                return Err(CommandError::NotConnected(robot.to_string()));
            }
        };

        let frames = [OutboundFrame::Text(Arc::from(command.to_string()))];
        match deliver_timed(&target, &frames, self.send_timeout).await {
            Ok(()) => {
                tracing::debug!(robot = %robot, link = %id, "Command sent");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(robot = %robot, link = %id, error = %e, "Command send failed, dropping link");
                self.unregister(robot, id).await;
                if let Some(target) = target.upgrade() {
                    target.evict();
                }
                Err(CommandError::Delivery(e))
            }
        }
    }
}
