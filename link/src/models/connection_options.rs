use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection-level options for the changefeed transport.
///
/// These options control:
/// - Automatic reconnection on transport loss
/// - Reconnection timing and retry limits
///
/// Separate from [`CacheOptions`](super::CacheOptions), which bound the
/// snapshot store.
///
/// # Example
///
/// ```rust
/// use estate_link::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_auto_reconnect(true)
///     .with_reconnect_delay_ms(2000)
///     .with_max_reconnect_attempts(Some(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Reconnect a table's feed after transport loss.
    /// Default: true
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Initial delay in milliseconds between reconnection attempts.
    /// Grows exponentially up to `max_reconnect_delay_ms`.
    /// Default: 1000ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Default: 30000ms
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Maximum number of consecutive failed attempts before the table falls
    /// back to non-realtime mode.
    /// Default: None (retry forever). `Some(0)` disables reconnection.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30000
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30000,
            max_reconnect_attempts: None,
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the initial delay between reconnection attempts (in milliseconds)
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the maximum delay between reconnection attempts (in milliseconds)
    pub fn with_max_reconnect_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = max_delay_ms;
        self
    }

    /// Pass None for infinite retries, Some(0) to disable reconnection
    pub fn with_max_reconnect_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Backoff before reconnect attempt `attempt` (0-based):
    /// `min(reconnect_delay_ms * 2^attempt, max_reconnect_delay_ms)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(32));
        let delay = self.reconnect_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_reconnect_delay_ms))
    }

    /// Whether another attempt is allowed after `failed_attempts` failures.
    pub fn allows_attempt(&self, failed_attempts: u32) -> bool {
        if !self.auto_reconnect {
            return false;
        }
        match self.max_reconnect_attempts {
            Some(max) => failed_attempts < max,
            None => true,
        }
    }
}
