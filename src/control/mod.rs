//! Robot control channel
//!
//! Robots open a control connection on `/control/ws/{real|sim}/{id}`; the hub
//! pushes JSON commands (navigation goals) down it. Anything the robot sends
//! back is treated as a heartbeat.

pub mod command;
pub mod links;

pub use command::{NavGoal, Pose};
pub use links::ControlRegistry;
