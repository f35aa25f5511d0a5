//! Control commands sent to robots

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Target pose in map coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, yaw: f64) -> Self {
        Self { x, y, yaw }
    }
}

/// Navigation goal for a robot's planner
#[derive(Debug, Clone, PartialEq)]
pub struct NavGoal {
    /// Name of the waypoint, echoed back by the robot
    pub target: String,
    pub pose: Pose,
    /// Who asked for the move
    pub requested_by: Option<String>,
}

impl NavGoal {
    pub fn new(target: impl Into<String>, pose: Pose) -> Self {
        Self {
            target: target.into(),
            pose,
            requested_by: None,
        }
    }

    pub fn requested_by(mut self, user: impl Into<String>) -> Self {
        self.requested_by = Some(user.into());
        self
    }

    /// Wire form: `{"type":"nav_goal","target":..,"pose":{..},"requested_by":..}`
    pub fn to_command(&self) -> Value {
        let mut command = json!({
            "type": "nav_goal",
            "target": self.target,
            "pose": self.pose,
        });
        if let (Some(user), Some(map)) = (&self.requested_by, command.as_object_mut()) {
            map.insert("requested_by".into(), json!(user));
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nav_goal_wire_form() {
        let goal = NavGoal::new("entrance_1", Pose::new(1.5, 0.0, 0.0)).requested_by("operator");

        assert_eq!(
            goal.to_command(),
            json!({
                "type": "nav_goal",
                "target": "entrance_1",
                "pose": { "x": 1.5, "y": 0.0, "yaw": 0.0 },
                "requested_by": "operator",
            })
        );
    }

    #[test]
    fn test_anonymous_goal_omits_requester() {
        let command = NavGoal::new("wait", Pose::new(0.5, 0.0, 0.0)).to_command();
        assert!(command.get("requested_by").is_none());
    }
}
