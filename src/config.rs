use std::{env, fs, time::Duration};

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::rest::StatusPolicy;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level configuration loaded from `config.json`, with a few
// environment overrides applied on top.
//
// It defines:
// - REST client settings (host, proxy, retry, timeout)
// - WebSocket settings (host, reconnect delay)
// - Streams the binary subscribes to on startup
// - Root directory of stored market data
// - Optional debug configuration
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Exchange identifier (e.g. "binance")
    #[serde(default = "default_exchange")]
    pub exchange: String,

    pub rest: RestConfig,

    pub ws: WsConfig,

    /// Streams subscribed by the binary at startup
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,

    /// Root of the on-disk data layout
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

// ------------------------------------------------------------
// REST configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct RestConfig {
    /// Base URL, e.g. "https://api.binance.com"
    pub host: String,

    /// Optional outbound proxy for every REST request
    pub proxy: Option<String>,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential backoff, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Total per-request timeout, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Which HTTP error statuses are retried
    #[serde(default)]
    pub status_policy: StatusPolicy,
}

impl RestConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            proxy: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
            status_policy: StatusPolicy::default(),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ------------------------------------------------------------
// WebSocket configuration
// ------------------------------------------------------------
//
// The reconnect delay is fixed; only REST retries back off
// exponentially.
//
#[derive(Debug, Deserialize, Clone)]
pub struct WsConfig {
    /// Full endpoint, e.g. "wss://stream.binance.com:9443/ws"
    pub host: String,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl WsConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.trim().is_empty() {
            bail!("ws.host must not be empty");
        }
        if !(self.host.starts_with("ws://") || self.host.starts_with("wss://")) {
            bail!("ws.host must be a ws:// or wss:// URL, got {}", self.host);
        }
        if self.connect_timeout_secs == 0 {
            bail!("ws.connect_timeout_secs must be positive");
        }
        Ok(())
    }
}

// ------------------------------------------------------------
// Startup subscriptions
// ------------------------------------------------------------
//
// `freq` absent → trade stream, present → bar stream.
//
#[derive(Debug, Deserialize, Clone)]
pub struct SubscriptionConfig {
    /// Exchange symbol, e.g. "BTCUSDT"
    pub symbol: String,

    /// Bar interval, e.g. "1m"
    pub freq: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Log every dispatched payload
    pub log: Option<bool>,
}

fn default_exchange() -> String {
    "binance".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Reads a JSON configuration file, applies `ZQ_*` environment
    /// overrides and validates the result.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        let mut cfg = Self::from_json(&data)?;
        cfg.apply_env(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json(data: &str) -> anyhow::Result<Self> {
        serde_json::from_str(data).context("invalid config JSON")
    }

    /// Overrides fields from variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ZQ_REST_HOST") {
            self.rest.host = host;
        }
        if let Some(host) = lookup("ZQ_WS_HOST") {
            self.ws.host = host;
        }
        if let Some(dir) = lookup("ZQ_DATA_DIR") {
            self.data_dir = dir;
        }
        if let Some(proxy) = lookup("ZQ_PROXY") {
            self.rest.proxy = Some(proxy).filter(|p| !p.is_empty());
        }
        if let Some(v) = lookup("ZQ_MAX_RETRIES") {
            self.rest.max_retries = v.parse().context("ZQ_MAX_RETRIES must be an integer")?;
        }
        if let Some(v) = lookup("ZQ_RETRY_DELAY_MS") {
            self.rest.retry_delay_ms = v.parse().context("ZQ_RETRY_DELAY_MS must be an integer")?;
        }
        if let Some(v) = lookup("ZQ_TIMEOUT_SECS") {
            self.rest.timeout_secs = v.parse().context("ZQ_TIMEOUT_SECS must be an integer")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rest.host.trim().is_empty() {
            bail!("rest.host must not be empty");
        }
        if self.rest.timeout_secs == 0 {
            bail!("rest.timeout_secs must be positive");
        }
        self.ws.validate()
    }

    pub fn debug_log(&self) -> bool {
        self.debug.as_ref().is_some_and(|d| d.log.unwrap_or(false))
    }
}
