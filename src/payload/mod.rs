//! Canonical payloads
//!
//! Every producer message is normalized into a [`Payload`] exactly once, at
//! ingest. Viewers, the inference worker and the persistence workers only
//! ever see these types.

pub mod camera;
pub mod key;
pub mod telemetry;

pub use camera::{CameraFrame, Detection};
pub use key::{ChannelKey, RobotId, Source, StreamKind};
pub use telemetry::{
    clamp_range, normalize_range, Battery, Odom, Position, Scan, TelemetryEvent, Twist,
    LIDAR_MAX_RANGE,
};

/// A normalized message on a channel
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Telemetry(TelemetryEvent),
    Frame(CameraFrame),
}

impl Payload {
    /// Short type name for logs
    pub fn type_name(&self) -> &str {
        match self {
            Payload::Telemetry(event) => event.kind(),
            Payload::Frame(_) => "frame",
        }
    }
}

impl From<TelemetryEvent> for Payload {
    fn from(event: TelemetryEvent) -> Self {
        Payload::Telemetry(event)
    }
}

impl From<CameraFrame> for Payload {
    fn from(frame: CameraFrame) -> Self {
        Payload::Frame(frame)
    }
}
