//! Inference configuration

use std::time::Duration;

/// Shortest accepted inference timeout
pub const MIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest accepted inference timeout
pub const MAX_TIMEOUT: Duration = Duration::from_secs(5);

/// Object-detection service options
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// URL of the detection service. No inference worker runs without one.
    pub endpoint: Option<String>,

    /// Upper bound on one inference call, connect included
    pub timeout: Duration,

    /// TCP connect timeout for the HTTP client
    pub connect_timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
        }
    }
}

impl InferenceConfig {
    /// Set the detection service URL
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    /// Set the per-call timeout, clamped to 100 ms..=5 s
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT);
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
