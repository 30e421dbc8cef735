//! Configuration parsing for the price-feed client.
//!
//! Settings come from an optional JSON file and are then overridden by
//! environment variables, so a deployment can point at a different endpoint
//! without editing the file.
//!
//! # Example config
//!
//! ```json
//! {
//!   "environment": "production",
//!   "ws_url": "wss://feed.example.com",
//!   "heartbeat_interval_sec": 30,
//!   "max_reconnect_attempts": 5,
//!   "tickers": ["IDEA", "YESBANK"]
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::FeedError;

/// Overrides [`FeedConfig::environment`].
pub const ENV_ENVIRONMENT: &str = "LQ_ENV";
/// Overrides [`FeedConfig::ws_url`].
pub const ENV_WS_URL: &str = "LQ_WS_URL";
/// Overrides [`FeedConfig::debug_websocket`] when set to `"true"`.
pub const ENV_DEBUG_WEBSOCKET: &str = "LQ_DEBUG_WEBSOCKET";

const DEV_WS_URL: &str = "ws://localhost:5000";
const PROD_WS_URL: &str = "wss://stock-info-backend.onrender.com";

/// Deployment environment; selects the default endpoint and the allowed scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    /// Endpoint used when neither the file nor the environment names one.
    pub fn default_ws_url(self) -> &'static str {
        match self {
            Self::Development => DEV_WS_URL,
            Self::Production => PROD_WS_URL,
        }
    }
}

/// Price-feed client configuration, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub environment: Environment,

    /// Feed endpoint. Falls back to [`Environment::default_ws_url`].
    pub ws_url: Option<String>,

    /// Interval between `ping` frames while connected.
    pub heartbeat_interval_sec: u64,

    /// Force a reconnect when a ping stays unanswered this long. Disabled when
    /// absent.
    pub pong_timeout_sec: Option<u64>,

    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,

    /// Delay before the first reconnect attempt; doubles per attempt.
    pub reconnect_base_ms: u64,

    /// Upper bound for the reconnect delay.
    pub reconnect_max_ms: u64,

    /// Log every inbound and outbound frame at debug level.
    pub debug_websocket: bool,

    /// Tickers the runner subscribes to at startup.
    pub tickers: Vec<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            ws_url: None,
            heartbeat_interval_sec: 30,
            pong_timeout_sec: None,
            max_reconnect_attempts: 5,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            debug_websocket: false,
            tickers: Vec::new(),
        }
    }
}

impl FeedConfig {
    /// Default config pointing at an explicit endpoint.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { ws_url: Some(url.into()), ..Self::default() }
    }

    /// Returns the effective endpoint URL.
    pub fn ws_url(&self) -> &str {
        self.ws_url.as_deref().unwrap_or_else(|| self.environment.default_ws_url())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_sec)
    }

    pub fn pong_timeout(&self) -> Option<Duration> {
        self.pong_timeout_sec.map(Duration::from_secs)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    /// Apply overrides from a variable lookup (normally `std::env::var`).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup(ENV_ENVIRONMENT).as_deref().and_then(Environment::parse) {
            self.environment = env;
        }
        if let Some(url) = lookup(ENV_WS_URL).filter(|u| !u.trim().is_empty()) {
            self.ws_url = Some(url.trim().to_string());
        }
        if let Some(flag) = lookup(ENV_DEBUG_WEBSOCKET) {
            self.debug_websocket = flag.eq_ignore_ascii_case("true");
        }
    }

    /// Check the settings for values the client cannot run with.
    pub fn validate(&self) -> Result<(), FeedError> {
        let raw = self.ws_url();
        let url = url::Url::parse(raw).map_err(|e| FeedError::Config(format!("ws_url {raw:?}: {e}")))?;
        match (url.scheme(), self.environment) {
            ("wss", _) | ("ws", Environment::Development) => {}
            ("ws", Environment::Production) => {
                return Err(FeedError::Config(format!("production requires wss://, got {raw}")));
            }
            (other, _) => return Err(FeedError::Config(format!("unsupported scheme {other:?} in {raw}"))),
        }
        if self.heartbeat_interval_sec == 0 {
            return Err(FeedError::Config("heartbeat_interval_sec must be positive".into()));
        }
        if self.reconnect_base_ms == 0 {
            return Err(FeedError::Config("reconnect_base_ms must be positive".into()));
        }
        if self.reconnect_max_ms < self.reconnect_base_ms {
            return Err(FeedError::Config("reconnect_max_ms is below reconnect_base_ms".into()));
        }
        Ok(())
    }
}

/// Load a JSON config file, apply environment overrides, and validate.
///
/// With no path, the defaults plus environment overrides are used.
pub fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<FeedConfig> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        }
        None => FeedConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
