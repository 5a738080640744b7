//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::{CartWorkerConfig, CoordinatorConfig, MAX_WORKER_ID, RetryPolicy};
use thiserror::Error;

/// A configuration value that must not fall back to its default.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("WORKER_ID must be an integer in 0..={max}, got {value:?}")]
    InvalidWorkerId { value: String, max: u16 },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `8083`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on in-memory stores
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `WORKER_ID`: order-number worker id, 0..=1023 (default: `1`)
/// - `LOCK_TIMEOUT_MS`: row-lock wait bound (default: `2000`)
/// - `REQUEST_TIMEOUT_MS`: create-order deadline (default: `5000`)
/// - `MAX_ORDER_LINES`: lines per order (default: `100`)
/// - `CART_WORKERS`, `CART_QUEUE_CAPACITY`, `CART_MAX_ATTEMPTS`,
///   `CART_BACKOFF_MS`: cart reconciliation pool (defaults: `2`, `1024`, `3`, `100`)
/// - `SHUTDOWN_DRAIN_MS`: cart drain bound on shutdown (default: `5000`)
///
/// Unparseable numeric values fall back to their default, except
/// `WORKER_ID`: two instances sharing a worker id can issue duplicate order
/// numbers, so a present but invalid value is an error.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub worker_id: u16,
    pub lock_timeout: Duration,
    pub request_timeout: Duration,
    pub max_order_lines: usize,
    pub cart_workers: usize,
    pub cart_queue_capacity: usize,
    pub cart_max_attempts: u32,
    pub cart_backoff: Duration,
    pub shutdown_drain: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let parse_or = |key: &str, default| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        let millis_or = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let worker_id = match lookup("WORKER_ID") {
            None => defaults.worker_id,
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|id| *id <= MAX_WORKER_ID)
                .ok_or(ConfigError::InvalidWorkerId {
                    value: raw,
                    max: MAX_WORKER_ID,
                })?,
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            worker_id,
            lock_timeout: millis_or("LOCK_TIMEOUT_MS", defaults.lock_timeout),
            request_timeout: millis_or("REQUEST_TIMEOUT_MS", defaults.request_timeout),
            max_order_lines: parse_or("MAX_ORDER_LINES", defaults.max_order_lines),
            cart_workers: parse_or("CART_WORKERS", defaults.cart_workers),
            cart_queue_capacity: parse_or("CART_QUEUE_CAPACITY", defaults.cart_queue_capacity),
            cart_max_attempts: lookup("CART_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cart_max_attempts),
            cart_backoff: millis_or("CART_BACKOFF_MS", defaults.cart_backoff),
            shutdown_drain: millis_or("SHUTDOWN_DRAIN_MS", defaults.shutdown_drain),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            request_timeout: self.request_timeout,
            max_lines: self.max_order_lines,
        }
    }

    pub fn cart_workers(&self) -> CartWorkerConfig {
        CartWorkerConfig {
            workers: self.cart_workers,
            queue_capacity: self.cart_queue_capacity,
            retry: RetryPolicy {
                max_attempts: self.cart_max_attempts,
                backoff: self.cart_backoff,
            },
            drain_timeout: self.shutdown_drain,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8083,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            worker_id: 1,
            lock_timeout: Duration::from_millis(2000),
            request_timeout: Duration::from_millis(5000),
            max_order_lines: 100,
            cart_workers: 2,
            cart_queue_capacity: 1024,
            cart_max_attempts: 3,
            cart_backoff: Duration::from_millis(100),
            shutdown_drain: Duration::from_millis(5000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8083);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.worker_id, 1);
        assert_eq!(config.cart_max_attempts, 3);
    }

    #[test]
    fn test_empty_lookup_matches_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.addr(), Config::default().addr());
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PORT", "9000"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("WORKER_ID", "17"),
            ("LOCK_TIMEOUT_MS", "250"),
            ("CART_BACKOFF_MS", "20"),
            ("MAX_ORDER_LINES", "5"),
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/orders"));
        assert_eq!(config.worker_id, 17);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.cart_workers().retry.backoff, Duration::from_millis(20));
        assert_eq!(config.coordinator().max_lines, 5);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = from_pairs(&[("PORT", "http"), ("CART_WORKERS", "-1"), ("DATABASE_URL", " ")]);
        assert_eq!(config.port, 8083);
        assert_eq!(config.cart_workers, 2);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_invalid_worker_id_is_an_error() {
        for raw in ["70000", "1024", "-1", "one", ""] {
            let result = Config::from_lookup(|key| (key == "WORKER_ID").then(|| raw.to_string()));
            assert!(
                matches!(result, Err(ConfigError::InvalidWorkerId { ref value, .. }) if value == raw),
                "WORKER_ID={raw:?}"
            );
        }

        let config = Config::from_lookup(|key| (key == "WORKER_ID").then(|| "1023".to_string()));
        assert_eq!(config.unwrap().worker_id, 1023);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
