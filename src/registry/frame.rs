//! Frames delivered to viewers
//!
//! A payload is encoded once per broadcast into one or more
//! [`OutboundFrame`]s, which every viewer then shares.

use std::sync::Arc;

use bytes::Bytes;

use crate::payload::Payload;

/// A single message to a viewer
///
/// This is designed to be cheap to clone: text is behind an `Arc` and
/// binary data is reference counted by `Bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// UTF-8 JSON message
    Text(Arc<str>),
    /// Encoded image
    Binary(Bytes),
}

impl OutboundFrame {
    /// Encode a payload into the frames a viewer receives for it.
    ///
    /// Telemetry becomes one JSON text frame. A camera frame becomes one
    /// binary frame, followed by a `yolo` detections message when the frame
    /// carries inference results.
    pub fn encode(payload: &Payload) -> Vec<OutboundFrame> {
        match payload {
            Payload::Telemetry(event) => {
                vec![OutboundFrame::Text(event.to_json().to_string().into())]
            }
            Payload::Frame(frame) => {
                let mut frames = Vec::with_capacity(2);
                frames.push(OutboundFrame::Binary(frame.data.clone()));
                if let Some(message) = frame.detections_message() {
                    frames.push(OutboundFrame::Text(message.to_string().into()));
                }
                frames
            }
        }
    }

    /// Size of the frame body in bytes
    pub fn len(&self) -> usize {
        match self {
            OutboundFrame::Text(text) => text.len(),
            OutboundFrame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
