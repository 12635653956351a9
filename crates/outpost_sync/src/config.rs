//! Configuration for the session scheduler.

use std::time::Duration;

/// Timing and endpoint settings of a session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Shortest time between the starts of two passes of one store.
    pub min_sync_interval: Duration,
    /// Shortest timer armed while the interval has not elapsed.
    pub min_timer_delay: Duration,
    /// Delay before retrying a pass that left work behind.
    pub incomplete_retry_delay: Duration,
    /// Period of the forced refresh from the server.
    pub auto_update_interval: Duration,
    /// Base URL of the server APIs.
    pub api_base_url: String,
}

impl SyncConfig {
    /// Creates a configuration talking to `api_base_url`.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            min_sync_interval: Duration::from_secs(30),
            min_timer_delay: Duration::from_secs(1),
            incomplete_retry_delay: Duration::from_secs(5),
            auto_update_interval: Duration::from_secs(30 * 60),
            api_base_url: api_base_url.into(),
        }
    }

    /// Sets the minimum interval between passes.
    pub fn with_min_sync_interval(mut self, interval: Duration) -> Self {
        self.min_sync_interval = interval;
        self
    }

    /// Sets the shortest armed timer.
    pub fn with_min_timer_delay(mut self, delay: Duration) -> Self {
        self.min_timer_delay = delay;
        self
    }

    /// Sets the retry delay after an incomplete pass.
    pub fn with_incomplete_retry_delay(mut self, delay: Duration) -> Self {
        self.incomplete_retry_delay = delay;
        self
    }

    /// Sets the forced refresh period.
    pub fn with_auto_update_interval(mut self, interval: Duration) -> Self {
        self.auto_update_interval = interval;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.min_sync_interval, Duration::from_secs(30));
        assert_eq!(config.min_timer_delay, Duration::from_secs(1));
        assert_eq!(config.incomplete_retry_delay, Duration::from_secs(5));
        assert_eq!(config.auto_update_interval, Duration::from_secs(1800));
        assert!(config.api_base_url.is_empty());
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("https://api.example.com")
            .with_min_sync_interval(Duration::from_secs(10))
            .with_min_timer_delay(Duration::from_millis(500))
            .with_incomplete_retry_delay(Duration::from_secs(2))
            .with_auto_update_interval(Duration::from_secs(600));

        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.min_sync_interval, Duration::from_secs(10));
        assert_eq!(config.min_timer_delay, Duration::from_millis(500));
        assert_eq!(config.incomplete_retry_delay, Duration::from_secs(2));
        assert_eq!(config.auto_update_interval, Duration::from_secs(600));
    }
}
