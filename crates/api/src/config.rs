//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use message_bus::{BusConfig, RetryPolicy};
use saga::{DEFAULT_GATEWAY_TIMEOUT, QueueNames, SagaConfig};

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset selects the in-memory store
/// - `BUS_HOST`, `BUS_PORT`, `BUS_USER`, `BUS_PASSWORD`, `BUS_VHOST`: broker
/// - `BUS_CONNECT_ATTEMPTS`, `BUS_CONNECT_BACKOFF_MS`: connect retry policy
/// - `BUS_MAX_REDELIVERIES`: redeliveries of a retryable failure (default `3`)
/// - `BUS_MAX_QUEUE_LENGTH`: buffered messages kept per queue (default `10000`)
/// - `GATEWAY_TIMEOUT_MS`: bound for each gateway call (default `5000`)
/// - one variable per queue, named after the queue's default name
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub bus: BusConfig,
    pub queues: QueueNames,
    pub gateway_timeout: Duration,
    pub max_redeliveries: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |name: &str, default: String| lookup(name).unwrap_or(default);

        let retry = RetryPolicy::new(
            parsed(&lookup, "BUS_CONNECT_ATTEMPTS").unwrap_or(defaults.bus.retry.max_attempts),
            parsed(&lookup, "BUS_CONNECT_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.bus.retry.base_delay),
        );

        let bus = BusConfig {
            host: var("BUS_HOST", defaults.bus.host),
            port: parsed(&lookup, "BUS_PORT").unwrap_or(defaults.bus.port),
            user: var("BUS_USER", defaults.bus.user),
            password: var("BUS_PASSWORD", defaults.bus.password),
            vhost: var("BUS_VHOST", defaults.bus.vhost),
            retry,
            max_queue_length: parsed(&lookup, "BUS_MAX_QUEUE_LENGTH")
                .unwrap_or(defaults.bus.max_queue_length),
        };

        let queues = QueueNames {
            order_status: var(saga::queues::ORDER_STATUS_QUEUE, defaults.queues.order_status),
            order_decline: var(saga::queues::ORDER_DECLINE_QUEUE, defaults.queues.order_decline),
            warehouse_decline: var(
                saga::queues::WAREHOUSE_DECLINE_QUEUE,
                defaults.queues.warehouse_decline,
            ),
            delivery_decline: var(
                saga::queues::DELIVERY_DECLINE_QUEUE,
                defaults.queues.delivery_decline,
            ),
            delivery_order_action: var(
                saga::queues::DELIVERY_ORDER_ACTION_QUEUE,
                defaults.queues.delivery_order_action,
            ),
            subscription_action: var(
                saga::queues::SUBSCRIPTION_ACTION_QUEUE,
                defaults.queues.subscription_action,
            ),
        };

        Self {
            host: var("HOST", defaults.host),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: var("RUST_LOG", defaults.log_level),
            log_format: parsed(&lookup, "LOG_FORMAT").unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            bus,
            queues,
            gateway_timeout: parsed(&lookup, "GATEWAY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_timeout),
            max_redeliveries: parsed(&lookup, "BUS_MAX_REDELIVERIES")
                .unwrap_or(defaults.max_redeliveries),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Orchestrator settings derived from this configuration.
    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            queues: self.queues.clone(),
            gateway_timeout: self.gateway_timeout,
        }
    }
}

fn parsed<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            bus: BusConfig::default(),
            queues: QueueNames::default(),
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
            max_redeliveries: 3,
        }
    }
}
