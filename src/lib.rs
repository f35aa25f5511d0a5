//! Telemetry and camera fan-out hub for robot fleets
//!
//! Robots (real or simulated) push telemetry events and camera frames over
//! WebSocket. The hub normalizes each message once, keeps the latest value per
//! channel, and fans it out to every viewer of that channel. Camera frames are
//! also offered to an external object-detection service through a latest-only
//! queue, and telemetry is persisted to SQLite through a bounded FIFO.
//! Each robot may also hold one control link over which the hub pushes
//! commands such as navigation goals (see [`Hub::send_command`]).
//!
//! ```text
//!   producer ──► server::session ──► ingest::IngestAdapter
//!                                        │
//!                  ┌─────────────────────┼──────────────────────┐
//!                  ▼                     ▼                      ▼
//!         registry (latest +     queue::LatestQueue     queue::HistoryQueue
//!           broadcast)                   │                      │
//!                  ▲                     ▼                      ▼
//!                  └──────── inference::InferenceWorker   persistence workers
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use robot_hub::{Hub, HubConfig, HubServer};
//!
//! #[tokio::main]
//! async fn main() -> robot_hub::Result<()> {
//!     let hub = Hub::start(HubConfig::from_env())?;
//!     let server = HubServer::new(hub.clone());
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     hub.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod control;
pub mod error;
pub mod hub;
pub mod inference;
pub mod ingest;
pub mod payload;
pub mod persistence;
pub mod queue;
pub mod registry;
pub mod server;
pub mod stats;
pub mod supervisor;

pub use control::{ControlRegistry, NavGoal, Pose};
pub use error::{CommandError, Error, Result};
pub use hub::{Hub, HubBuilder, HubConfig};
pub use payload::{
    CameraFrame, ChannelKey, Detection, Payload, RobotId, Source, StreamKind, TelemetryEvent,
};
pub use registry::ChannelRegistry;
pub use server::{HubServer, ServerConfig};
