//! Timeouts bounding the saga's suspension points.

use std::time::Duration;

/// Per-call timeouts for the external calls a purchase makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SagaConfig {
    pub location_timeout: Duration,
    pub gateway_timeout: Duration,
    pub commit_timeout: Duration,
}

impl SagaConfig {
    pub fn with_location_timeout(mut self, timeout: Duration) -> Self {
        self.location_timeout = timeout;
        self
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            location_timeout: Duration::from_millis(5_000),
            gateway_timeout: Duration::from_millis(30_000),
            commit_timeout: Duration::from_millis(10_000),
        }
    }
}
