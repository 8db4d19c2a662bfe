//! Application configuration.
//!
//! Loaded from TOML (every key has a default), then overridden from the
//! environment.

use crate::error::{AppError, AppResult};
use mfeed_core::{Endpoints, Subscription, Topic, APPROVED_PAIRS, DEFAULT_METRICS};
use mfeed_fallback::{FallbackConfig, LiveFeedConfig};
use mfeed_ws::{BackoffPolicy, ConnectorConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Stream connector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Heartbeat ping interval (ms). Default: 20,000.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Pong deadline after a ping (ms). Default: 10,000.
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    /// Reconnect backoff base (ms). Default: 500.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Reconnect backoff cap (ms). Default: 30,000.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Backoff base after a missed pong (ms). Default: 1,000.
    #[serde(default = "default_heartbeat_backoff_base_ms")]
    pub heartbeat_backoff_base_ms: u64,
    /// Backoff cap after a missed pong (ms). Default: 60,000.
    #[serde(default = "default_heartbeat_backoff_max_ms")]
    pub heartbeat_backoff_max_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Cap on a buffered partial frame (bytes). Default: 1 MiB.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Debug logging and throughput logs.
    #[serde(default)]
    pub debug: bool,
    /// Never open the stream; poll permanently.
    #[serde(default)]
    pub disabled: bool,
    /// Seconds without data before the badge reads "disconnected". Default: 10.
    #[serde(default = "default_badge_disconnect_secs")]
    pub badge_disconnect_secs: u64,
}

fn default_ping_interval_ms() -> u64 {
    20_000
}

fn default_pong_timeout_ms() -> u64 {
    10_000
}

fn default_backoff_base_ms() -> u64 {
    BackoffPolicy::RECONNECT.base_ms
}

fn default_backoff_max_ms() -> u64 {
    BackoffPolicy::RECONNECT.max_ms
}

fn default_heartbeat_backoff_base_ms() -> u64 {
    BackoffPolicy::HEARTBEAT.base_ms
}

fn default_heartbeat_backoff_max_ms() -> u64 {
    BackoffPolicy::HEARTBEAT.max_ms
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_frame_bytes() -> usize {
    1 << 20
}

fn default_badge_disconnect_secs() -> u64 {
    10
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            heartbeat_backoff_base_ms: default_heartbeat_backoff_base_ms(),
            heartbeat_backoff_max_ms: default_heartbeat_backoff_max_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            debug: false,
            disabled: false,
            badge_disconnect_secs: default_badge_disconnect_secs(),
        }
    }
}

impl From<WsConfig> for ConnectorConfig {
    fn from(cfg: WsConfig) -> Self {
        Self {
            url: String::new(),
            ping_interval_ms: cfg.ping_interval_ms,
            pong_timeout_ms: cfg.pong_timeout_ms,
            backoff: BackoffPolicy::new(cfg.backoff_base_ms, cfg.backoff_max_ms),
            heartbeat_backoff: BackoffPolicy::new(
                cfg.heartbeat_backoff_base_ms,
                cfg.heartbeat_backoff_max_ms,
            ),
            connect_timeout_ms: cfg.connect_timeout_ms,
            max_frame_bytes: cfg.max_frame_bytes,
            debug_logging: cfg.debug,
            ..Default::default()
        }
    }
}

/// Polling fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSettings {
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Live with no message for longer than this counts as unhealthy.
    #[serde(default = "default_grace_window_ms")]
    pub grace_window_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Snapshot HTTP request timeout (ms). Default: 10,000.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_health_check_interval_ms() -> u64 {
    1_000
}

fn default_grace_window_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_health_check_interval_ms(),
            grace_window_ms: default_grace_window_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl From<&FallbackSettings> for FallbackConfig {
    fn from(cfg: &FallbackSettings) -> Self {
        Self {
            health_check_interval: Duration::from_millis(cfg.health_check_interval_ms),
            grace_window: Duration::from_millis(cfg.grace_window_ms),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
        }
    }
}

/// Stream authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Append a token to the stream URL.
    #[serde(default)]
    pub require_auth: bool,
    #[serde(default)]
    pub token: Option<String>,
    /// File holding the token, read when no token is configured.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

/// Subscribe message sent on start and replayed on every reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_pairs")]
    pub pairs: Vec<String>,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_pairs() -> Vec<String> {
    APPROVED_PAIRS.iter().map(|p| p.to_string()).collect()
}

fn default_metrics() -> Vec<String> {
    DEFAULT_METRICS.iter().map(|m| m.to_string()).collect()
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pairs: default_pairs(),
            metrics: default_metrics(),
        }
    }
}

/// Status server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_status_host")]
    pub host: String,
    #[serde(default = "default_status_port")]
    pub port: u16,
}

fn default_status_host() -> String {
    "127.0.0.1".to_string()
}

fn default_status_port() -> u16 {
    8080
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_status_host(),
            port: default_status_port(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Absolute backend API URL. Default: http://localhost:3000/api.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Explicit stream base URL; derived from `api_url` when unset.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub fallback: FallbackSettings,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

fn default_topics() -> Vec<String> {
    vec!["market".to_string()]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            ws_url: None,
            topics: default_topics(),
            websocket: WsConfig::default(),
            fallback: FallbackSettings::default(),
            auth: AuthConfig::default(),
            subscription: SubscriptionConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load a specific file (defaults when it does not exist), then apply
    /// the environment.
    pub fn load_from(path: &str) -> AppResult<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn apply_env_overrides(&mut self) -> AppResult<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MFEED_WS_PING_MS") {
            self.websocket.ping_interval_ms = parse_number("MFEED_WS_PING_MS", &v)?;
        }
        if let Some(v) = get("MFEED_WS_PONG_TIMEOUT_MS") {
            self.websocket.pong_timeout_ms = parse_number("MFEED_WS_PONG_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("MFEED_WS_BACKOFF_BASE_MS") {
            self.websocket.backoff_base_ms = parse_number("MFEED_WS_BACKOFF_BASE_MS", &v)?;
        }
        if let Some(v) = get("MFEED_WS_BACKOFF_MAX_MS") {
            self.websocket.backoff_max_ms = parse_number("MFEED_WS_BACKOFF_MAX_MS", &v)?;
        }
        if let Some(v) = get("MFEED_WS_BADGE_DISCONNECT_SECS") {
            self.websocket.badge_disconnect_secs =
                parse_number("MFEED_WS_BADGE_DISCONNECT_SECS", &v)?;
        }
        if let Some(v) = get("MFEED_DEBUG_WS") {
            self.websocket.debug = is_flag_set(&v);
        }
        if let Some(v) = get("MFEED_DISABLE_WS") {
            self.websocket.disabled = is_flag_set(&v);
        }
        if let Some(v) = get("MFEED_REQUIRE_AUTH") {
            self.auth.require_auth = is_flag_set(&v);
        }
        if let Some(v) = get("MFEED_API_URL") {
            self.api_url = Some(v);
        }
        if let Some(v) = get("MFEED_WS_URL") {
            self.ws_url = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.topics.is_empty() {
            return Err(AppError::Config("at least one topic is required".to_string()));
        }
        self.topics()?;

        let ws = &self.websocket;
        if ws.ping_interval_ms == 0 || ws.pong_timeout_ms == 0 {
            return Err(AppError::Config(
                "ping interval and pong timeout must be positive".to_string(),
            ));
        }
        if ws.backoff_base_ms > ws.backoff_max_ms
            || ws.heartbeat_backoff_base_ms > ws.heartbeat_backoff_max_ms
        {
            return Err(AppError::Config(
                "backoff base must not exceed backoff max".to_string(),
            ));
        }

        let fb = &self.fallback;
        if fb.health_check_interval_ms == 0 || fb.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "health check and poll intervals must be positive".to_string(),
            ));
        }

        if self.status.enabled {
            self.status_addr()?;
        }
        Ok(())
    }

    /// Bind address of the status server.
    pub fn status_addr(&self) -> AppResult<SocketAddr> {
        format!("{}:{}", self.status.host, self.status.port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid status address: {e}")))
    }

    pub fn topics(&self) -> AppResult<Vec<Topic>> {
        self.topics
            .iter()
            .map(|t| Topic::new(t.as_str()).map_err(AppError::from))
            .collect()
    }

    pub fn endpoints(&self) -> AppResult<Endpoints> {
        Ok(Endpoints::resolve(
            self.api_url.as_deref(),
            self.ws_url.as_deref(),
        )?)
    }

    /// Stream token, only when auth is required.
    pub fn stream_token(&self) -> AppResult<Option<String>> {
        if !self.auth.require_auth {
            return Ok(None);
        }
        Ok(mfeed_core::resolve_token(
            std::env::var("MFEED_WS_TOKEN").ok(),
            self.auth.token.as_deref(),
            self.auth.token_file.as_deref(),
        )?)
    }

    pub fn subscription(&self) -> Option<Subscription> {
        self.subscription.enabled.then(|| {
            Subscription::new(
                self.subscription.pairs.clone(),
                self.subscription.metrics.clone(),
            )
        })
    }

    /// Live feed settings for one topic.
    pub fn live_feed_config(&self, topic: Topic, stream_url: String) -> LiveFeedConfig {
        let mut connector: ConnectorConfig = self.websocket.clone().into();
        connector.url = stream_url;

        LiveFeedConfig {
            fallback: FallbackConfig::from(&self.fallback),
            subscription: self.subscription(),
            disable_streaming: self.websocket.disabled,
            ..LiveFeedConfig::new(topic, connector)
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> AppResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{key} must be a non-negative integer, got {value:?}")))
}

fn is_flag_set(value: &str) -> bool {
    matches!(value.trim(), "1" | "true")
}
