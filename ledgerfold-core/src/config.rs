use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for a stream projector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectorConfig {
    /// Maximum number of messages loaded and applied before the checkpoint
    /// is persisted.
    /// Default: 1000
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// How long a listening projector waits for a wakeup before running a
    /// catch-up pass anyway (milliseconds).
    /// Default: 30s
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Delay between attempts when the error policy asks for a retry
    /// (milliseconds).
    /// Default: 100ms
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Delay before re-establishing a lost wakeup subscription (milliseconds).
    /// Default: 1s
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Consecutive reconnect failures tolerated before the failure is handed
    /// to the error policy.
    /// Default: 10
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

const fn default_batch_size() -> u32 {
    1000
}

const fn default_idle_timeout_ms() -> u64 {
    30_000
}

const fn default_retry_delay_ms() -> u64 {
    100
}

const fn default_reconnect_delay_ms() -> u64 {
    1_000
}

const fn default_max_reconnect_attempts() -> u32 {
    10
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            idle_timeout_ms: default_idle_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl ProjectorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = millis(timeout);
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = millis(delay);
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = millis(delay);
        self
    }

    #[must_use]
    pub const fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
