//! Camera frames and detection results

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::IngestError;

/// One object found by the inference service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_name: String,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
        }
        .clamped()
    }

    /// Force confidence into `[0, 1]`; non-finite values become 0.
    pub fn clamped(mut self) -> Self {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}

/// An encoded image (JPEG/PNG) plus optional inference results
///
/// Cheap to clone: the image is reference counted.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub data: Bytes,
    pub detections: Option<Vec<Detection>>,
}

impl CameraFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            detections: None,
        }
    }

    /// Attach inference results
    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = Some(detections);
        self
    }

    /// Decode a text envelope carrying a base64 image.
    ///
    /// The image is read from `image`, falling back to `data` when `image`
    /// is absent or empty. A `data:<mime>;base64,` prefix is stripped.
    pub fn from_envelope(text: &str) -> Result<Self, IngestError> {
        let envelope: Value = serde_json::from_str(text)?;

        let encoded = ["image", "data"]
            .iter()
            .filter_map(|field| envelope.get(*field)?.as_str())
            .find(|s| !s.is_empty())
            .ok_or(IngestError::MissingImageField)?;

        let encoded = match encoded.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => encoded,
        };

        let data = STANDARD.decode(encoded.trim())?;
        Ok(Self::new(data))
    }

    /// The JSON message announcing this frame's detections, if any
    pub fn detections_message(&self) -> Option<Value> {
        self.detections
            .as_ref()
            .map(|detections| json!({ "type": "yolo", "detections": detections }))
    }

    /// Size of the encoded image in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];

    #[test]
    fn test_envelope_image_field() {
        let text = format!(r#"{{"image":"{}"}}"#, STANDARD.encode(JPEG_MAGIC));
        let frame = CameraFrame::from_envelope(&text).unwrap();
        assert_eq!(&frame.data[..], JPEG_MAGIC);
        assert!(frame.detections.is_none());
    }

    #[test]
    fn test_envelope_data_field_fallback() {
        let text = format!(r#"{{"image":"","data":"{}"}}"#, STANDARD.encode(JPEG_MAGIC));
        let frame = CameraFrame::from_envelope(&text).unwrap();
        assert_eq!(&frame.data[..], JPEG_MAGIC);
    }

    #[test]
    fn test_envelope_data_url_prefix() {
        let text = format!(
            r#"{{"image":"data:image/jpeg;base64,{}"}}"#,
            STANDARD.encode(JPEG_MAGIC)
        );
        let frame = CameraFrame::from_envelope(&text).unwrap();
        assert_eq!(frame.len(), JPEG_MAGIC.len());
    }

    #[test]
    fn test_envelope_errors() {
        assert!(matches!(
            CameraFrame::from_envelope(r#"{"frame":"abc"}"#),
            Err(IngestError::MissingImageField)
        ));
        assert!(matches!(
            CameraFrame::from_envelope(r#"{"image":"!!not base64!!"}"#),
            Err(IngestError::Base64(_))
        ));
        assert!(matches!(
            CameraFrame::from_envelope("garbage"),
            Err(IngestError::Json(_))
        ));
    }

    #[test]
    fn test_detection_clamping() {
        assert_eq!(Detection::new("person", 1.7).confidence, 1.0);
        assert_eq!(Detection::new("person", -0.2).confidence, 0.0);
        assert_eq!(Detection::new("person", f32::NAN).confidence, 0.0);
        assert_eq!(Detection::new("person", 0.42).confidence, 0.42);
    }

    #[test]
    fn test_detection_wire_name() {
        let detection: Detection =
            serde_json::from_str(r#"{"class":"cone","confidence":0.9}"#).unwrap();
        assert_eq!(detection.class_name, "cone");

        let frame = CameraFrame::new(Bytes::from_static(JPEG_MAGIC)).with_detections(vec![detection]);
        let message = frame.detections_message().unwrap();
        assert_eq!(message["type"], "yolo");
        assert_eq!(message["detections"][0]["class"], "cone");
    }
}
