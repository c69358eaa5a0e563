//! Session connection manager configuration.
//!
//! Configuration is loaded from environment variables. Unparseable values
//! fall back to defaults; zero durations and buffers are rejected.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default quality sampling interval in milliseconds.
pub const DEFAULT_QUALITY_SAMPLE_INTERVAL_MS: u64 = 2000;

/// Default maximum outgoing bandwidth in bits per second.
pub const DEFAULT_MAX_BANDWIDTH_BPS: u64 = 2_500_000;

/// Default bound on reconnection attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Default linear backoff unit in milliseconds.
pub const DEFAULT_RECONNECT_BACKOFF_BASE_MS: u64 = 2000;

/// Default consecutive stats failures before quality becomes Unknown.
pub const DEFAULT_STATS_FAILURE_THRESHOLD: u32 = 3;

/// Default UI event channel capacity.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Default number of remembered inbound message ids.
pub const DEFAULT_MESSAGE_DEDUP_WINDOW: usize = 1024;

/// Connection manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Quality sampling period (default: 2s).
    pub quality_sample_interval: Duration,

    /// Bandwidth ceiling used for quality scoring and the adaptive target.
    pub max_bandwidth_bps: u64,

    /// Maximum reconnection attempts before a connection fails terminally.
    pub max_reconnect_attempts: u32,

    /// Backoff unit; attempt n waits `base * n`.
    pub reconnect_backoff_base: Duration,

    /// Consecutive failed stats reads before quality is marked Unknown.
    pub stats_failure_threshold: u32,

    /// Capacity of the UI event channel.
    pub event_buffer: usize,

    /// Number of inbound message ids remembered for deduplication.
    pub message_dedup_window: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quality_sample_interval: Duration::from_millis(DEFAULT_QUALITY_SAMPLE_INTERVAL_MS),
            max_bandwidth_bps: DEFAULT_MAX_BANDWIDTH_BPS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff_base: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_BASE_MS),
            stats_failure_threshold: DEFAULT_STATS_FAILURE_THRESHOLD,
            event_buffer: DEFAULT_EVENT_BUFFER,
            message_dedup_window: DEFAULT_MESSAGE_DEDUP_WINDOW,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let sample_interval_ms = vars
            .get("RTC_QUALITY_SAMPLE_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_QUALITY_SAMPLE_INTERVAL_MS);

        let max_bandwidth_bps = vars
            .get("RTC_MAX_BANDWIDTH_BPS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_BANDWIDTH_BPS);

        let max_reconnect_attempts = vars
            .get("RTC_MAX_RECONNECT_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);

        let backoff_base_ms = vars
            .get("RTC_RECONNECT_BACKOFF_BASE_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECONNECT_BACKOFF_BASE_MS);

        let stats_failure_threshold = vars
            .get("RTC_STATS_FAILURE_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_STATS_FAILURE_THRESHOLD);

        let event_buffer = vars
            .get("RTC_EVENT_BUFFER")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_EVENT_BUFFER);

        let message_dedup_window = vars
            .get("RTC_MESSAGE_DEDUP_WINDOW")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MESSAGE_DEDUP_WINDOW);

        let config = Config {
            quality_sample_interval: Duration::from_millis(sample_interval_ms),
            max_bandwidth_bps,
            max_reconnect_attempts,
            reconnect_backoff_base: Duration::from_millis(backoff_base_ms),
            stats_failure_threshold,
            event_buffer,
            message_dedup_window,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall timers or channels.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quality_sample_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RTC_QUALITY_SAMPLE_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }
        if self.reconnect_backoff_base.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RTC_RECONNECT_BACKOFF_BASE_MS must be greater than zero".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "RTC_EVENT_BUFFER must be greater than zero".to_string(),
            ));
        }
        if self.message_dedup_window == 0 {
            return Err(ConfigError::InvalidValue(
                "RTC_MESSAGE_DEDUP_WINDOW must be greater than zero".to_string(),
            ));
        }
        if self.stats_failure_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "RTC_STATS_FAILURE_THRESHOLD must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
