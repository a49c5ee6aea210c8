//! Connection settings for the message bus.

use std::time::Duration;

use rand::Rng;

/// Default number of connection attempts before giving up.
const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Default delay before the second connection attempt.
const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Upper bound for a single backoff delay.
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default jitter factor (10%).
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Default cap on messages buffered per queue.
pub const DEFAULT_MAX_QUEUE_LENGTH: usize = 10_000;

/// Exponential backoff used while establishing the bus connection.
///
/// ```text
/// attempt   delay (base = 500ms)   with jitter (±10%)
/// -------   --------------------   ------------------
///    1        none
///    2        500ms                  450ms - 550ms
///    3        1s                     0.9s - 1.1s
///    4        2s                     1.8s - 2.2s
///    5        4s                     3.6s - 4.4s
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_CONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based), jitter
    /// included.
    ///
    /// `delay = min(base_delay * 2^(attempt - 1), max_delay) ± jitter`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = self.nominal_delay(attempt).as_secs_f64();
        let jitter_range = delay * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_secs_f64((delay + jitter).max(0.0))
    }

    /// Delay after the given failed attempt before jitter is applied.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Returns true if another attempt is allowed after `attempt` failures.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Broker location and credentials.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub retry: RetryPolicy,
    /// Messages kept per queue (buffered, and separately dead-lettered)
    /// before the oldest is dropped.
    pub max_queue_length: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            retry: RetryPolicy::default(),
            max_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
        }
    }
}

impl BusConfig {
    /// Endpoint description safe to log (no password).
    pub fn endpoint(&self) -> String {
        format!("amqp://{}@{}:{}{}", self.user, self.host, self.port, self.vhost_path())
    }

    /// Full connection URL including credentials.
    pub fn connection_url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}{}",
            self.user,
            self.password,
            self.host,
            self.port,
            self.vhost_path()
        )
    }

    fn vhost_path(&self) -> String {
        if self.vhost.starts_with('/') {
            self.vhost.clone()
        } else {
            format!("/{}", self.vhost)
        }
    }
}
