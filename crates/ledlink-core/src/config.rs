//! Link configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host-side link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Endpoint handed to the connector (e.g. "/dev/ttyACM0" or "COM6")
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// How long to wait for a reply to each command, in milliseconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// Consecutive failures before the session is dropped
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Reconnection backoff
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Status poll interval in milliseconds
    #[serde(default = "default_status_interval")]
    pub status_interval_ms: u64,

    /// Receive buffer limit in bytes
    #[serde(default = "default_max_buffer")]
    pub max_buffer: usize,

    /// Collapse queued same-field updates into the latest one
    #[serde(default = "default_true")]
    pub coalesce: bool,

    /// Require a Status reply before declaring a new session connected
    #[serde(default = "default_true")]
    pub probe_on_connect: bool,
}

/// Exponential backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First retry delay in milliseconds
    #[serde(default = "default_backoff_initial")]
    pub initial_ms: u64,

    /// Delay cap in milliseconds
    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,

    /// Growth factor per failed attempt
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial(),
            max_ms: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

// Default value functions
fn default_endpoint() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_baud_rate() -> u32 {
    crate::DEFAULT_BAUD_RATE
}

fn default_response_timeout() -> u64 {
    1000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_status_interval() -> u64 {
    5000
}

fn default_max_buffer() -> usize {
    crate::session::DEFAULT_MAX_BUFFER
}

fn default_true() -> bool {
    true
}

fn default_backoff_initial() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    8000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl LinkConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            baud_rate: default_baud_rate(),
            response_timeout_ms: default_response_timeout(),
            failure_threshold: default_failure_threshold(),
            backoff: BackoffConfig::default(),
            status_interval_ms: default_status_interval(),
            max_buffer: default_max_buffer(),
            coalesce: true,
            probe_on_connect: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LinkConfig = toml::from_str(
            r#"
            endpoint = "COM6"
            failure_threshold = 5

            [backoff]
            max_ms = 4000
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint, "COM6");
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.backoff.initial_ms, 500);
        assert_eq!(config.backoff.max_ms, 4000);
        assert!(config.probe_on_connect);
        assert_eq!(config.response_timeout(), Duration::from_secs(1));
    }
}
