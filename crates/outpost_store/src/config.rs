//! Store configuration.

use std::time::Duration;

/// Tuning knobs shared by every store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// How long a sync pass waits for not-yet-ready items.
    pub readiness_timeout: Duration,
    /// Poll period of the default readiness wait.
    pub readiness_poll_interval: Duration,
    /// Queued operations run back to back before the worker yields.
    pub operation_batch_yield: usize,
}

impl StoreConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the readiness timeout.
    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Sets the readiness poll interval.
    pub fn with_readiness_poll_interval(mut self, interval: Duration) -> Self {
        self.readiness_poll_interval = interval;
        self
    }

    /// Sets how many operations run before the worker yields.
    pub fn with_operation_batch_yield(mut self, operations: usize) -> Self {
        self.operation_batch_yield = operations.max(1);
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_secs(5),
            readiness_poll_interval: Duration::from_millis(250),
            operation_batch_yield: 100,
        }
    }
}
