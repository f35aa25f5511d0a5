//! Telemetry events and lidar normalization
//!
//! Producers send UTF-8 JSON of the form `{"type": "...", "data": {...}}`.
//! Parsing happens once, at ingest, and yields a typed [`TelemetryEvent`].
//! For `scan` events every range is clamped so that downstream consumers
//! never see NaN, infinities, non-positive or over-range values.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::IngestError;

/// Clamp ceiling for lidar ranges. Also the "no return" sentinel.
pub const LIDAR_MAX_RANGE: f64 = 3.5;

/// Normalize a single lidar range.
///
/// Returns `LIDAR_MAX_RANGE` when `r` is not finite, `<= 0` or
/// `>= LIDAR_MAX_RANGE`; otherwise `r` unchanged.
pub fn clamp_range(r: f64) -> f64 {
    if r.is_finite() && r > 0.0 && r < LIDAR_MAX_RANGE {
        r
    } else {
        LIDAR_MAX_RANGE
    }
}

/// Normalize a raw JSON range value. Non-numeric values map to the ceiling.
pub fn normalize_range(value: &Value) -> f64 {
    value.as_f64().map_or(LIDAR_MAX_RANGE, clamp_range)
}

/// Robot position in map coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// Planar velocity (forward speed and yaw rate)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Twist {
    /// m/s along the robot's x axis
    pub linear: f64,
    /// rad/s around the z axis
    pub angular: f64,
}

/// Odometry update
#[derive(Debug, Clone, PartialEq)]
pub struct Odom {
    pub position: Position,
    pub twist: Option<Twist>,
    /// Fields not interpreted here (orientation, covariance, ...)
    pub extra: Map<String, Value>,
}

/// Battery level update
#[derive(Debug, Clone, PartialEq)]
pub struct Battery {
    /// Remaining charge in percent
    pub percentage: f64,
    pub extra: Map<String, Value>,
}

/// Lidar sweep
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    /// Normalized ranges, each in `(0, LIDAR_MAX_RANGE]`
    pub ranges: Vec<f64>,
    /// Fields not interpreted here (angle_min, angle_increment, ...)
    pub extra: Map<String, Value>,
}

/// A normalized telemetry event
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Odom(Odom),
    Battery(Battery),
    Scan(Scan),
    /// Any other event type. Relayed to viewers, never persisted.
    Other { kind: String, data: Value },
}

impl TelemetryEvent {
    /// Parse and normalize a producer's JSON text.
    ///
    /// Bare `NaN`, `Infinity` and `-Infinity` literals, and numbers too large
    /// for an `f64`, are accepted and read as non-numeric values.
    pub fn parse(text: &str) -> Result<Self, IngestError> {
        let text = replace_non_finite_literals(text);
        let value: Value = serde_json::from_str(&text)?;
        Self::from_value(value)
    }

    /// Build an event from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, IngestError> {
        let Value::Object(mut message) = value else {
            return Err(IngestError::MissingType);
        };

        let kind = match message.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(IngestError::MissingType),
        };
        let data = message.remove("data").unwrap_or(Value::Null);

        match kind.as_str() {
            "odom" => parse_odom(into_object("odom", data)?).map(TelemetryEvent::Odom),
            "battery" => parse_battery(into_object("battery", data)?).map(TelemetryEvent::Battery),
            "scan" => parse_scan(into_object("scan", data)?).map(TelemetryEvent::Scan),
            _ => Ok(TelemetryEvent::Other { kind, data }),
        }
    }

    /// The event's `type` tag
    pub fn kind(&self) -> &str {
        match self {
            TelemetryEvent::Odom(_) => "odom",
            TelemetryEvent::Battery(_) => "battery",
            TelemetryEvent::Scan(_) => "scan",
            TelemetryEvent::Other { kind, .. } => kind,
        }
    }

    /// Canonical JSON form sent to viewers
    pub fn to_json(&self) -> Value {
        let data = match self {
            TelemetryEvent::Odom(odom) => {
                let mut data = odom.extra.clone();
                data.insert("position".into(), json!(odom.position));
                if let Some(twist) = odom.twist {
                    data.insert(
                        "twist".into(),
                        json!({
                            "linear": { "x": twist.linear },
                            "angular": { "z": twist.angular },
                        }),
                    );
                }
                Value::Object(data)
            }
            TelemetryEvent::Battery(battery) => {
                let mut data = battery.extra.clone();
                data.insert("percentage".into(), json!(battery.percentage));
                Value::Object(data)
            }
            TelemetryEvent::Scan(scan) => {
                let mut data = scan.extra.clone();
                data.insert("ranges".into(), json!(scan.ranges));
                Value::Object(data)
            }
            TelemetryEvent::Other { data, .. } => data.clone(),
        };

        json!({ "type": self.kind(), "data": data })
    }
}

fn into_object(kind: &'static str, data: Value) -> Result<Map<String, Value>, IngestError> {
    match data {
        Value::Object(map) => Ok(map),
        _ => Err(IngestError::malformed(kind, "`data` is not an object")),
    }
}

fn parse_odom(mut data: Map<String, Value>) -> Result<Odom, IngestError> {
    let position = data
        .remove("position")
        .ok_or_else(|| IngestError::malformed("odom", "missing position"))?;
    let position: Position = serde_json::from_value(position)
        .map_err(|e| IngestError::malformed("odom", format!("position: {e}")))?;

    // Robots report velocity under three different layouts.
    let twist = take_velocity(&mut data, "twist", "/linear/x", "/angular/z")
        .or_else(|| take_velocity(&mut data, "linear_velocity", "/x", "angular_velocity"))
        .or_else(|| take_velocity(&mut data, "linear_vel", "/x", "angular_vel"));

    Ok(Odom {
        position,
        twist,
        extra: data,
    })
}

/// Extract a twist from `data`, removing the source fields on success.
///
/// With `field == "twist"` both components live under one object; otherwise
/// `angular` names the sibling field carrying the yaw rate under `/z`.
fn take_velocity(
    data: &mut Map<String, Value>,
    field: &str,
    linear_ptr: &str,
    angular: &str,
) -> Option<Twist> {
    let linear = data.get(field)?.pointer(linear_ptr)?.as_f64()?;
    let (angular, angular_field) = if field == "twist" {
        (data.get(field)?.pointer(angular)?.as_f64()?, None)
    } else {
        (data.get(angular)?.pointer("/z")?.as_f64()?, Some(angular))
    };

    data.remove(field);
    if let Some(angular_field) = angular_field {
        data.remove(angular_field);
    }
    Some(Twist { linear, angular })
}

fn parse_battery(mut data: Map<String, Value>) -> Result<Battery, IngestError> {
    let percentage = ["percentage", "percent", "battery"]
        .iter()
        .find_map(|field| {
            let value = data.get(*field)?.as_f64()?;
            data.remove(*field);
            Some(value)
        })
        .ok_or_else(|| IngestError::malformed("battery", "missing numeric percentage"))?;

    Ok(Battery {
        percentage,
        extra: data,
    })
}

fn parse_scan(mut data: Map<String, Value>) -> Result<Scan, IngestError> {
    let ranges = match data.remove("ranges") {
        Some(Value::Array(raw)) => raw.iter().map(normalize_range).collect(),
        Some(_) => return Err(IngestError::malformed("scan", "`ranges` is not a list")),
        None => return Err(IngestError::malformed("scan", "missing ranges")),
    };

    Ok(Scan {
        ranges,
        extra: data,
    })
}

/// Rewrite tokens that cannot become a finite `f64` to `null`.
///
/// Some robot bridges emit bare `NaN` / `Infinity` / `-Infinity` for lidar
/// "no return" values, which is not valid JSON. Numeric literals that
/// overflow `f64` (`1e400`) would otherwise fail the whole message. String
/// contents are left untouched.
fn replace_non_finite_literals(text: &str) -> Cow<'_, str> {
    let spans = non_finite_spans(text);
    if spans.is_empty() {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    for (start, end) in spans {
        out.push_str(&text[copied..start]);
        out.push_str("null");
        copied = end;
    }
    out.push_str(&text[copied..]);

    Cow::Owned(out)
}

/// Byte ranges of non-finite tokens outside string literals
fn non_finite_spans(text: &str) -> Vec<(usize, usize)> {
    const LITERALS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if b == b'"' {
            in_string = true;
            i += 1;
            continue;
        }

        let Some(rest) = text.get(i..) else {
            i += 1;
            continue;
        };

        if let Some(literal) = LITERALS.iter().find(|lit| rest.starts_with(**lit)) {
            spans.push((i, i + literal.len()));
            i += literal.len();
        } else if b == b'-' || b.is_ascii_digit() {
            let len = rest
                .bytes()
                .take_while(|c| c.is_ascii_digit() || matches!(c, b'-' | b'+' | b'.' | b'e' | b'E'))
                .count();
            if rest[..len].parse::<f64>().is_ok_and(f64::is_infinite) {
                spans.push((i, i + len));
            }
            i += len;
        } else {
            i += 1;
        }
    }

    spans
}
