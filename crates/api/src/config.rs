//! Process configuration from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `BIND_ADDR` | `0.0.0.0:8080` |
//! | `DATABASE_URL` | unset (in-memory notification source) |
//! | `REALTIME_CHANNELS` | `orders` (comma-separated) |
//! | `REALTIME_KEEPALIVE_SECS` | `30` |
//! | `REALTIME_OUTBOUND_CAPACITY` | `64` |
//! | `REALTIME_SLOW_CONSUMER` | `disconnect` (`disconnect` or `drop`) |
//! | `REALTIME_QUEUE_CAPACITY` | `1024` |
//! | `REALTIME_RECONNECT_INITIAL_MS` | `500` |
//! | `REALTIME_RECONNECT_MAX_MS` | `30000` |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use storefront_core::ChannelName;
use storefront_realtime::{RealtimeConfig, SlowConsumerPolicy};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {var}: {message}")]
pub struct ConfigError {
    pub var: &'static str,
    pub message: String,
}

impl ConfigError {
    fn new(var: &'static str, message: impl Into<String>) -> Self {
        Self {
            var,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres URL for `LISTEN/NOTIFY`; `None` runs on the in-memory source.
    pub database_url: Option<String>,
    pub realtime: RealtimeConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_addr = match parse_var::<SocketAddr>("BIND_ADDR", get("BIND_ADDR"))? {
            Some(addr) => addr,
            None => SocketAddr::from_str(DEFAULT_BIND_ADDR)
                .map_err(|e| ConfigError::new("BIND_ADDR", e.to_string()))?,
        };

        let mut realtime = RealtimeConfig::default();

        if let Some(raw) = get("REALTIME_CHANNELS") {
            realtime.channels = parse_channels(&raw)?;
        }
        if let Some(secs) = parse_positive::<u64>("REALTIME_KEEPALIVE_SECS", get("REALTIME_KEEPALIVE_SECS"))? {
            realtime.keepalive_interval = Duration::from_secs(secs);
        }
        if let Some(capacity) =
            parse_positive::<usize>("REALTIME_OUTBOUND_CAPACITY", get("REALTIME_OUTBOUND_CAPACITY"))?
        {
            realtime.outbound_capacity = capacity;
        }
        if let Some(policy) = get("REALTIME_SLOW_CONSUMER") {
            realtime.slow_consumer = SlowConsumerPolicy::from_str(&policy)
                .map_err(|e| ConfigError::new("REALTIME_SLOW_CONSUMER", e.to_string()))?;
        }
        if let Some(capacity) =
            parse_positive::<usize>("REALTIME_QUEUE_CAPACITY", get("REALTIME_QUEUE_CAPACITY"))?
        {
            realtime.dispatch_queue_capacity = capacity;
        }
        if let Some(ms) = parse_positive::<u64>(
            "REALTIME_RECONNECT_INITIAL_MS",
            get("REALTIME_RECONNECT_INITIAL_MS"),
        )? {
            realtime.reconnect.initial = Duration::from_millis(ms);
        }
        if let Some(ms) =
            parse_positive::<u64>("REALTIME_RECONNECT_MAX_MS", get("REALTIME_RECONNECT_MAX_MS"))?
        {
            realtime.reconnect.max = Duration::from_millis(ms);
        }
        if realtime.reconnect.max < realtime.reconnect.initial {
            return Err(ConfigError::new(
                "REALTIME_RECONNECT_MAX_MS",
                "must not be lower than REALTIME_RECONNECT_INITIAL_MS",
            ));
        }

        Ok(Self {
            bind_addr,
            database_url: get("DATABASE_URL"),
            realtime,
        })
    }
}

impl core::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // The database URL may carry credentials.
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("realtime", &self.realtime)
            .finish()
    }
}

fn parse_var<T>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.map(|v| v.parse::<T>().map_err(|e| ConfigError::new(var, e.to_string())))
        .transpose()
}

fn parse_positive<T>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr + Default + PartialEq,
    T::Err: core::fmt::Display,
{
    match parse_var::<T>(var, raw)? {
        Some(v) if v == T::default() => Err(ConfigError::new(var, "must be greater than zero")),
        other => Ok(other),
    }
}

fn parse_channels(raw: &str) -> Result<Vec<ChannelName>, ConfigError> {
    let channels = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| ChannelName::new(s).map_err(|e| ConfigError::new("REALTIME_CHANNELS", e.to_string())))
        .collect::<Result<Vec<_>, _>>()?;

    if channels.is_empty() {
        return Err(ConfigError::new("REALTIME_CHANNELS", "at least one channel is required"));
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = config(&[]).unwrap();

        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.realtime.channels, vec![ChannelName::new("orders").unwrap()]);
        assert_eq!(cfg.realtime.keepalive_interval, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("REALTIME_CHANNELS", "orders, kitchen_tickets ,"),
            ("REALTIME_KEEPALIVE_SECS", "15"),
            ("REALTIME_OUTBOUND_CAPACITY", "8"),
            ("REALTIME_SLOW_CONSUMER", "drop"),
            ("REALTIME_QUEUE_CAPACITY", "32"),
            ("REALTIME_RECONNECT_INITIAL_MS", "100"),
            ("REALTIME_RECONNECT_MAX_MS", "1000"),
        ])
        .unwrap();

        assert_eq!(cfg.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/shop"));
        assert_eq!(
            cfg.realtime.channels,
            vec![
                ChannelName::new("orders").unwrap(),
                ChannelName::new("kitchen_tickets").unwrap()
            ]
        );
        assert_eq!(cfg.realtime.keepalive_interval, Duration::from_secs(15));
        assert_eq!(cfg.realtime.outbound_capacity, 8);
        assert_eq!(cfg.realtime.slow_consumer, SlowConsumerPolicy::DropMessage);
        assert_eq!(cfg.realtime.dispatch_queue_capacity, 32);
        assert_eq!(cfg.realtime.reconnect.initial, Duration::from_millis(100));
        assert_eq!(cfg.realtime.reconnect.max, Duration::from_millis(1000));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = config(&[("DATABASE_URL", "  "), ("REALTIME_KEEPALIVE_SECS", "")]).unwrap();
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.realtime.keepalive_interval, Duration::from_secs(30));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        assert_eq!(config(&[("REALTIME_KEEPALIVE_SECS", "soon")]).unwrap_err().var, "REALTIME_KEEPALIVE_SECS");
        assert_eq!(config(&[("REALTIME_OUTBOUND_CAPACITY", "0")]).unwrap_err().var, "REALTIME_OUTBOUND_CAPACITY");
        assert_eq!(config(&[("REALTIME_SLOW_CONSUMER", "oldest")]).unwrap_err().var, "REALTIME_SLOW_CONSUMER");
        assert_eq!(config(&[("REALTIME_CHANNELS", " , ")]).unwrap_err().var, "REALTIME_CHANNELS");
        assert_eq!(config(&[("BIND_ADDR", "nowhere")]).unwrap_err().var, "BIND_ADDR");
        assert_eq!(
            config(&[("REALTIME_RECONNECT_INITIAL_MS", "5000"), ("REALTIME_RECONNECT_MAX_MS", "10")])
                .unwrap_err()
                .var,
            "REALTIME_RECONNECT_MAX_MS"
        );
    }

    #[test]
    fn debug_output_hides_the_database_url() {
        let cfg = config(&[("DATABASE_URL", "postgres://admin:hunter2@db/shop")]).unwrap();
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }
}
