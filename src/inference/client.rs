//! Object-detection clients

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::config::InferenceConfig;
use crate::error::InferenceError;
use crate::payload::Detection;

/// Runs object detection on an encoded image
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(&self, image: Bytes) -> Result<Vec<Detection>, InferenceError>;
}

/// Detection service reached over HTTP
///
/// The image is POSTed as multipart field `file` (`frame.jpg`,
/// `image/jpeg`). The service answers with either a bare list of
/// `{"class", "confidence"}` objects or an object wrapping that list under
/// `objects`.
pub struct HttpInferenceClient {
    url: String,
    http: reqwest::Client,
}

impl HttpInferenceClient {
    /// Create a client for `url` using the configured timeouts
    pub fn new(url: impl Into<String>, config: &InferenceConfig) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            url: url.into(),
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn infer(&self, image: Bytes) -> Result<Vec<Detection>, InferenceError> {
        let part = Part::bytes(image.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part("file", part);

        let resp = self.http.post(&self.url).multipart(form).send().await?;

        if !resp.status().is_success() {
            return Err(InferenceError::Status(resp.status().as_u16()));
        }

        let body = resp.bytes().await?;
        decode_response(&body)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    List(Vec<Detection>),
    Wrapped { objects: Vec<Detection> },
}

/// Parse a detection service response body
pub fn decode_response(body: &[u8]) -> Result<Vec<Detection>, InferenceError> {
    let response: InferenceResponse =
        serde_json::from_slice(body).map_err(|e| InferenceError::Decode(e.to_string()))?;

    let detections = match response {
        InferenceResponse::List(detections) => detections,
        InferenceResponse::Wrapped { objects } => objects,
    };

    Ok(detections.into_iter().map(Detection::clamped).collect())
}
