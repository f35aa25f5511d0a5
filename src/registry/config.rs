//! Registry configuration

use std::time::Duration;

/// Channel registry options
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Upper bound on a single viewer's delivery; slower viewers are pruned
    pub delivery_timeout: Duration,

    /// How often the reaper drops dead viewers and empty channels
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    /// Set the per-viewer delivery timeout
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Set the reaper interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}
