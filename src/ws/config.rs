#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Backoff;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY_DURATION: Duration = Duration::from_millis(3000);
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_CLOSE_TIMEOUT_DURATION: Duration = Duration::from_secs(2);
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for the chat connection manager.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
    /// Upper bound on opening the transport and transmitting the Validate frame.
    /// `None` leaves it to the transport's own timeouts.
    pub connect_timeout: Option<Duration>,
    /// How long [`crate::chat::Client::disconnect`] waits for the server to
    /// acknowledge the close before dropping the transport
    pub close_timeout: Duration,
    /// Capacity of the lifecycle event broadcast channel
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT_DURATION),
            close_timeout: DEFAULT_CLOSE_TIMEOUT_DURATION,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive automatic retries after unplanned closures
    pub max_attempts: u32,
    /// Retry `n` waits `base_delay * n`
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY_DURATION,
        }
    }
}

impl From<ReconnectConfig> for LinearBackoff {
    fn from(config: ReconnectConfig) -> Self {
        Self {
            base_delay: config.base_delay,
            max_attempts: config.max_attempts,
            attempt: 0,
        }
    }
}

/// Linear backoff that doubles as the consecutive-failure counter.
///
/// Every call to [`Backoff::next_backoff`] records one failed attempt. The
/// delay for attempt `n` is `base_delay * n`; once `n` exceeds `max_attempts`
/// it yields `None` until [`Backoff::reset`] is called.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl LinearBackoff {
    /// Consecutive failed attempts since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the retry budget has been used up.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempt > self.max_attempts
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        if self.is_exhausted() {
            return None;
        }
        Some(self.base_delay.saturating_mul(self.attempt))
    }
}
