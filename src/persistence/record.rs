//! History rows and the validation that produces them

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::payload::{Payload, Source, TelemetryEvent};
use crate::queue::QueueItem;

/// Measured values of one history row
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryFields {
    Odom {
        pos_x: f64,
        pos_y: f64,
        linear_velocity: f64,
        angular_velocity: f64,
    },
    Battery {
        percentage: f64,
    },
    Scan {
        ranges: Vec<f64>,
    },
}

/// One row of robot state history
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub producer_id: String,
    pub source: Source,
    pub timestamp: DateTime<Utc>,
    pub fields: HistoryFields,
}

/// Why a queued event is not persisted
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SkipReason {
    #[error("not a telemetry event")]
    NotTelemetry,

    #[error("event type `{0}` is not persisted")]
    UnpersistedType(String),

    #[error("odom without twist")]
    MissingTwist,

    #[error("odom with non-finite values")]
    NonFiniteOdom,

    #[error("battery percentage {0} outside 0..=100")]
    BatteryOutOfRange(f64),

    #[error("scan without ranges")]
    EmptyScan,
}

impl HistoryRecord {
    /// Validate a queued event and map it to a row
    pub fn from_item(item: &QueueItem) -> Result<Self, SkipReason> {
        let Payload::Telemetry(event) = &item.payload else {
            return Err(SkipReason::NotTelemetry);
        };

        let fields = match event {
            TelemetryEvent::Odom(odom) => {
                let twist = odom.twist.ok_or(SkipReason::MissingTwist)?;
                let values = [odom.position.x, odom.position.y, twist.linear, twist.angular];
                if !values.iter().all(|v| v.is_finite()) {
                    return Err(SkipReason::NonFiniteOdom);
                }
                HistoryFields::Odom {
                    pos_x: odom.position.x,
                    pos_y: odom.position.y,
                    linear_velocity: twist.linear,
                    angular_velocity: twist.angular,
                }
            }
            TelemetryEvent::Battery(battery) => {
                let p = battery.percentage;
                if !(p.is_finite() && (0.0..=100.0).contains(&p)) {
                    return Err(SkipReason::BatteryOutOfRange(p));
                }
                HistoryFields::Battery { percentage: p }
            }
            TelemetryEvent::Scan(scan) => {
                if scan.ranges.is_empty() {
                    return Err(SkipReason::EmptyScan);
                }
                HistoryFields::Scan {
                    ranges: scan.ranges.clone(),
                }
            }
            TelemetryEvent::Other { kind, .. } => {
                return Err(SkipReason::UnpersistedType(kind.clone()));
            }
        };

        Ok(Self {
            producer_id: item.key.producer_id.clone(),
            source: item.key.source,
            timestamp: item.received_at,
            fields,
        })
    }
}
