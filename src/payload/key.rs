//! Channel addressing
//!
//! A channel is the unit of fan-out: one stream kind from one producer,
//! partitioned by whether the producer is a real robot or a simulation.

use std::fmt;

/// Kind of stream carried by a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Structured JSON events (odom, battery, scan, ...)
    Telemetry,
    /// Image frames
    Camera,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Telemetry => "telemetry",
            StreamKind::Camera => "camera",
        }
    }

    /// Parse a path segment. `state` is accepted as an alias for telemetry.
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "telemetry" | "state" => Some(StreamKind::Telemetry),
            "camera" => Some(StreamKind::Camera),
            _ => None,
        }
    }
}

/// Whether a producer is a physical robot or a simulated one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Real,
    Simulated,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Real => "real",
            Source::Simulated => "sim",
        }
    }

    /// Parse a path segment. `robot` is accepted as an alias for real.
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "real" | "robot" => Some(Source::Real),
            "sim" | "simulated" | "simulation" => Some(Source::Simulated),
            _ => None,
        }
    }
}

/// Unique identifier for a channel (kind + source + producer)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub kind: StreamKind,
    pub source: Source,
    /// Producer (robot) identifier, e.g. "tb3_1"
    pub producer_id: String,
}

impl ChannelKey {
    pub fn new(kind: StreamKind, source: Source, producer_id: impl Into<String>) -> Self {
        Self {
            kind,
            source,
            producer_id: producer_id.into(),
        }
    }

    /// Telemetry channel of a producer
    pub fn telemetry(source: Source, producer_id: impl Into<String>) -> Self {
        Self::new(StreamKind::Telemetry, source, producer_id)
    }

    /// Camera channel of a producer
    pub fn camera(source: Source, producer_id: impl Into<String>) -> Self {
        Self::new(StreamKind::Camera, source, producer_id)
    }
}

impl ChannelKey {
    /// The producer this channel belongs to
    pub fn robot(&self) -> RobotId {
        RobotId::new(self.source, self.producer_id.clone())
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.kind.as_str(),
            self.source.as_str(),
            self.producer_id
        )
    }
}

/// A producer, independent of the streams it publishes
///
/// Addresses the robot's control link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RobotId {
    pub source: Source,
    pub producer_id: String,
}

impl RobotId {
    pub fn new(source: Source, producer_id: impl Into<String>) -> Self {
        Self {
            source,
            producer_id: producer_id.into(),
        }
    }
}

impl fmt::Display for RobotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source.as_str(), self.producer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let key = ChannelKey::camera(Source::Simulated, "tb3_1");
        assert_eq!(key.to_string(), "camera/sim/tb3_1");

        let key = ChannelKey::telemetry(Source::Real, "robot-1");
        assert_eq!(key.to_string(), "telemetry/real/robot-1");
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(StreamKind::parse("state"), Some(StreamKind::Telemetry));
        assert_eq!(StreamKind::parse("camera"), Some(StreamKind::Camera));
        assert_eq!(StreamKind::parse("video"), None);

        assert_eq!(Source::parse("robot"), Some(Source::Real));
        assert_eq!(Source::parse("sim"), Some(Source::Simulated));
        assert_eq!(Source::parse(""), None);
    }

    #[test]
    fn test_keys_partition_by_source() {
        let real = ChannelKey::camera(Source::Real, "tb3_1");
        let sim = ChannelKey::camera(Source::Simulated, "tb3_1");
        assert_ne!(real, sim);
    }

    #[test]
    fn test_robot_of_channel() {
        let camera = ChannelKey::camera(Source::Real, "tb3_1");
        let telemetry = ChannelKey::telemetry(Source::Real, "tb3_1");

        assert_eq!(camera.robot(), telemetry.robot());
        assert_eq!(camera.robot().to_string(), "real/tb3_1");
        assert_ne!(
            camera.robot(),
            ChannelKey::camera(Source::Simulated, "tb3_1").robot()
        );
    }
}
