//! Error types
//!
//! Each pipeline stage has its own error enum. None of them is fatal to a
//! long-running worker: callers log, count and move on. [`Error`] wraps them
//! for the places that surface a single error type (server startup, hub
//! construction).

use std::time::Duration;

use thiserror::Error;

/// A producer message that could not be normalized into a payload.
///
/// The message is dropped; the producer connection stays open.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Text message was not valid JSON
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Telemetry event without a string `type` tag
    #[error("telemetry event has no `type` tag")]
    MissingType,

    /// Known event type with missing or mistyped fields
    #[error("malformed {kind} event: {reason}")]
    Malformed { kind: &'static str, reason: String },

    /// Camera text envelope without an image field
    #[error("camera envelope has neither an `image` nor a `data` field")]
    MissingImageField,

    /// Camera envelope carried invalid base64
    #[error("invalid base64 image: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Binary frame sent to a telemetry endpoint
    #[error("binary message on a telemetry channel")]
    UnexpectedBinary,
}

impl IngestError {
    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        IngestError::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Failure to deliver to a single viewer.
///
/// Never surfaced to the producer; the viewer is pruned instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The viewer's connection (or its owner) is gone
    #[error("viewer connection closed")]
    Closed,

    /// The viewer did not accept the frames within the delivery timeout
    #[error("viewer delivery timed out")]
    Timeout,

    /// Transport-level write failure
    #[error("viewer write failed: {0}")]
    Write(String),
}

/// A control command that did not reach its robot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// No control link is registered for the robot
    #[error("robot {0} has no control link")]
    NotConnected(String),

    /// The link failed; it has been dropped
    #[error("control link failed: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Failure of the external inference call. Always handled as a frame drop.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference call timed out after {0:?}")]
    Timeout(Duration),

    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inference service returned HTTP {0}")]
    Status(u16),

    #[error("unexpected inference response: {0}")]
    Decode(String),
}

/// Failure of a history write. The write is rolled back and the item dropped.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result alias using the crate-level [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        let err = IngestError::malformed("odom", "missing position");
        assert_eq!(err.to_string(), "malformed odom event: missing position");
    }

    #[test]
    fn test_wrapping_into_crate_error() {
        let err: Error = IngestError::UnexpectedBinary.into();
        assert!(matches!(err, Error::Ingest(IngestError::UnexpectedBinary)));
        assert_eq!(err.to_string(), "binary message on a telemetry channel");
    }
}
