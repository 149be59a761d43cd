//! Feed Configuration Settings
//!
//! Configuration types for the ticker feed, loaded from environment variables.
//! Every value has a default so an empty environment yields a working
//! local-development setup.

use std::time::Duration;

use crate::domain::ticker::{Symbol, Ticker, builtin_default_tickers, canonical_symbol};
use crate::infrastructure::feed::codec::TickerCodec;

/// Local development backend.
const LOCAL_DEV_HOST: &str = "localhost:8080";

/// Realtime socket path on the market data backend.
const STREAM_PATH: &str = "/ws/market";

/// Polling endpoint path on the market data backend.
const POLL_PATH: &str = "/api/v1/prices";

/// Realtime and polling endpoint URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// WebSocket URL for realtime tickers.
    pub stream_url: String,
    /// HTTP URL returning the ticker list.
    pub poll_url: String,
}

impl Endpoints {
    /// Resolve both endpoints from a backend host.
    ///
    /// Without a host the local development backend is used.
    #[must_use]
    pub fn resolve(host: Option<&str>, secure: bool) -> Self {
        let host = host
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(LOCAL_DEV_HOST);
        let (ws, http) = if secure {
            ("wss", "https")
        } else {
            ("ws", "http")
        };

        Self {
            stream_url: format!("{ws}://{host}{STREAM_PATH}"),
            poll_url: format!("{http}://{host}{POLL_PATH}"),
        }
    }

    /// Local development endpoints.
    #[must_use]
    pub fn local_dev() -> Self {
        Self::resolve(None, false)
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::local_dev()
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.0 disables).
    pub jitter: f64,
    /// Maximum consecutive attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: 0,
        }
    }
}

/// Polling fallback settings.
#[derive(Debug, Clone)]
pub struct PollingSettings {
    /// Interval between fetches.
    pub interval: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Consecutive failures before stale data is published.
    pub stale_after_failures: u32,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            stale_after_failures: 3,
        }
    }
}

/// Channel and queue capacities.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Sends queued while the socket is not open.
    pub send_queue_capacity: usize,
    /// Ticker batches buffered per consumer.
    pub broadcast_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            send_queue_capacity: 32,
            broadcast_capacity: 1024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Backend endpoints.
    pub endpoints: Endpoints,
    /// Reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// Polling fallback.
    pub polling: PollingSettings,
    /// Channel capacities.
    pub channels: ChannelSettings,
    /// Server ports.
    pub server: ServerSettings,
    /// Published when no transport can deliver prices.
    pub default_tickers: Vec<Ticker>,
    /// Symbols the binary subscribes to at startup.
    pub symbols: Vec<Symbol>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            reconnect: ReconnectSettings::default(),
            polling: PollingSettings::default(),
            channels: ChannelSettings::default(),
            server: ServerSettings::default(),
            default_tickers: builtin_default_tickers(),
            symbols: Vec::new(),
        }
    }
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable, or if the
    /// resulting configuration fails [`FeedConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`FeedConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = &lookup;

        let secure = env("TICKER_FEED_SECURE").is_some_and(|v| parse_bool(&v));
        let mut endpoints = Endpoints::resolve(env("TICKER_FEED_HOST").as_deref(), secure);
        if let Some(url) = non_empty(env, "TICKER_FEED_STREAM_URL") {
            endpoints.stream_url = url;
        }
        if let Some(url) = non_empty(env, "TICKER_FEED_POLL_URL") {
            endpoints.poll_url = url;
        }

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            base_delay: parse_duration_millis(
                env,
                "TICKER_FEED_RECONNECT_BASE_MS",
                reconnect_defaults.base_delay,
            ),
            max_delay: parse_duration_secs(
                env,
                "TICKER_FEED_RECONNECT_MAX_SECS",
                reconnect_defaults.max_delay,
            ),
            multiplier: parse_or(
                env,
                "TICKER_FEED_RECONNECT_MULTIPLIER",
                reconnect_defaults.multiplier,
            ),
            jitter: parse_or(env, "TICKER_FEED_RECONNECT_JITTER", reconnect_defaults.jitter),
            max_attempts: parse_or(
                env,
                "TICKER_FEED_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
        };

        let polling_defaults = PollingSettings::default();
        let polling = PollingSettings {
            interval: parse_duration_secs(
                env,
                "TICKER_FEED_POLL_INTERVAL_SECS",
                polling_defaults.interval,
            ),
            timeout: parse_duration_secs(
                env,
                "TICKER_FEED_POLL_TIMEOUT_SECS",
                polling_defaults.timeout,
            ),
            stale_after_failures: parse_or(
                env,
                "TICKER_FEED_STALE_AFTER_FAILURES",
                polling_defaults.stale_after_failures,
            ),
        };

        let channel_defaults = ChannelSettings::default();
        let channels = ChannelSettings {
            send_queue_capacity: parse_or(
                env,
                "TICKER_FEED_SEND_QUEUE_CAPACITY",
                channel_defaults.send_queue_capacity,
            ),
            broadcast_capacity: parse_or(
                env,
                "TICKER_FEED_BROADCAST_CAPACITY",
                channel_defaults.broadcast_capacity,
            ),
        };

        let server = ServerSettings {
            health_port: parse_or(
                env,
                "TICKER_FEED_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let default_tickers = match non_empty(env, "TICKER_FEED_DEFAULT_TICKERS") {
            Some(json) => TickerCodec::new().decode_snapshot(&json).map_err(|e| {
                ConfigError::InvalidValue {
                    key: "TICKER_FEED_DEFAULT_TICKERS".to_string(),
                    reason: e.to_string(),
                }
            })?,
            None => builtin_default_tickers(),
        };

        let symbols = non_empty(env, "TICKER_FEED_SYMBOLS")
            .map(|raw| raw.split(',').filter_map(canonical_symbol).collect())
            .unwrap_or_default();

        let config = Self {
            endpoints,
            reconnect,
            polling,
            channels,
            server,
            default_tickers,
            symbols,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.interval.is_zero() {
            return Err(invalid("TICKER_FEED_POLL_INTERVAL_SECS", "must be positive"));
        }
        if self.polling.timeout.is_zero() {
            return Err(invalid("TICKER_FEED_POLL_TIMEOUT_SECS", "must be positive"));
        }
        if self.reconnect.base_delay.is_zero() {
            return Err(invalid("TICKER_FEED_RECONNECT_BASE_MS", "must be positive"));
        }
        if self.reconnect.base_delay > self.reconnect.max_delay {
            return Err(invalid(
                "TICKER_FEED_RECONNECT_BASE_MS",
                "must not exceed the reconnect ceiling",
            ));
        }
        if !(self.reconnect.multiplier >= 1.0 && self.reconnect.multiplier.is_finite()) {
            return Err(invalid(
                "TICKER_FEED_RECONNECT_MULTIPLIER",
                "must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(invalid(
                "TICKER_FEED_RECONNECT_JITTER",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.polling.stale_after_failures == 0 {
            return Err(invalid(
                "TICKER_FEED_STALE_AFTER_FAILURES",
                "must be at least 1",
            ));
        }
        if self.channels.send_queue_capacity == 0 {
            return Err(invalid(
                "TICKER_FEED_SEND_QUEUE_CAPACITY",
                "must be at least 1",
            ));
        }
        if self.channels.broadcast_capacity == 0 {
            return Err(invalid(
                "TICKER_FEED_BROADCAST_CAPACITY",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A setting is present but unusable.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Environment variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn non_empty<F>(env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_or<F, T>(env: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    env(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs<F>(env: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(env: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<FeedConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        FeedConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.endpoints.stream_url, "ws://localhost:8080/ws/market");
        assert_eq!(config.endpoints.poll_url, "http://localhost:8080/api/v1/prices");
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(30));
        assert_eq!(config.polling.interval, Duration::from_secs(10));
        assert_eq!(config.polling.stale_after_failures, 3);
        assert_eq!(config.channels.send_queue_capacity, 32);
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.default_tickers.len(), 5);
        assert!(config.symbols.is_empty());
    }

    #[test]
    fn host_resolves_secure_endpoints() {
        let endpoints = Endpoints::resolve(Some("feed.example.com"), true);
        assert_eq!(endpoints.stream_url, "wss://feed.example.com/ws/market");
        assert_eq!(endpoints.poll_url, "https://feed.example.com/api/v1/prices");
    }

    #[test]
    fn explicit_urls_override_host() {
        let config = config_from(&[
            ("TICKER_FEED_HOST", "feed.example.com"),
            ("TICKER_FEED_STREAM_URL", "ws://10.0.0.1:9000/stream"),
        ])
        .unwrap();
        assert_eq!(config.endpoints.stream_url, "ws://10.0.0.1:9000/stream");
        assert_eq!(config.endpoints.poll_url, "http://feed.example.com/api/v1/prices");
    }

    #[test]
    fn numeric_overrides_and_symbols() {
        let config = config_from(&[
            ("TICKER_FEED_RECONNECT_BASE_MS", "250"),
            ("TICKER_FEED_POLL_INTERVAL_SECS", "2"),
            ("TICKER_FEED_SYMBOLS", "btcusdt, ethusdt,,"),
        ])
        .unwrap();
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(250));
        assert_eq!(config.polling.interval, Duration::from_secs(2));
        assert_eq!(config.symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let config = config_from(&[("TICKER_FEED_POLL_INTERVAL_SECS", "soon")]).unwrap();
        assert_eq!(config.polling.interval, Duration::from_secs(10));
    }

    #[test]
    fn default_tickers_from_json() {
        let config = config_from(&[(
            "TICKER_FEED_DEFAULT_TICKERS",
            r#"[{"symbol":"doge","price":0.1,"change_24h":0,"volume_24h":0,"high_24h":0,"low_24h":0}]"#,
        )])
        .unwrap();
        assert_eq!(config.default_tickers.len(), 1);
        assert_eq!(config.default_tickers[0].symbol, "DOGE");
    }

    #[test]
    fn malformed_default_tickers_rejected() {
        let err = config_from(&[("TICKER_FEED_DEFAULT_TICKERS", "[{]")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "TICKER_FEED_DEFAULT_TICKERS"));
    }

    #[test]
    fn validate_rejects_bad_settings() {
        assert!(config_from(&[("TICKER_FEED_POLL_INTERVAL_SECS", "0")]).is_err());
        assert!(config_from(&[("TICKER_FEED_RECONNECT_BASE_MS", "60000")]).is_err());
        assert!(config_from(&[("TICKER_FEED_RECONNECT_MULTIPLIER", "0.5")]).is_err());
        assert!(config_from(&[("TICKER_FEED_RECONNECT_JITTER", "1.5")]).is_err());
        assert!(config_from(&[("TICKER_FEED_BROADCAST_CAPACITY", "0")]).is_err());
    }
}
