//! Configuration management for Eway device sessions

use crate::error::{EwayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::{env, time::Duration};

/// Default WebSocket port for chargers and energy storage
pub const DEFAULT_WS_PORT: u16 = 8888;

/// Default HTTP port for CT meters and smart plugs
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct EwayConfig {
    /// WebSocket session settings (chargers, energy storage)
    pub websocket: WebSocketConfig,

    /// HTTP polling settings (CT meter, smart plug)
    pub http: HttpPollConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// WebSocket session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Port used when the identity carries none
    pub port: u16,

    /// Bound on opening the socket
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Bound on a ping round-trip
    #[serde(with = "humantime_serde")]
    pub ping_timeout: Duration,

    /// Bound on the close handshake
    #[serde(with = "humantime_serde")]
    pub close_timeout: Duration,

    /// Delay between automatic reconnect attempts
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,

    /// Automatic reconnect attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Refresh period driven by the scheduler
    #[serde(with = "humantime_serde")]
    pub scan_interval: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_WS_PORT,
            connect_timeout: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            scan_interval: Duration::from_secs(30),
        }
    }
}

/// HTTP polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpPollConfig {
    /// Timeout for status polls
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Timeout for control and configuration calls
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Consecutive failures tolerated once connected
    pub max_connection_retries: u32,

    /// Failed attempts tolerated before the first success
    pub max_initial_attempts: u32,

    /// Pause after a failed attempt before the first success
    #[serde(with = "humantime_serde")]
    pub initial_retry_delay: Duration,

    /// Delay between the first good status poll and the config fetch
    #[serde(with = "humantime_serde")]
    pub config_fetch_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub ct_scan_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub plug_scan_interval: Duration,

    /// Attempts made by a connectivity probe
    pub probe_attempts: u32,

    /// Pause between probe attempts
    #[serde(with = "humantime_serde")]
    pub probe_delay: Duration,
}

impl Default for HttpPollConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(10),
            max_connection_retries: 3,
            max_initial_attempts: 3,
            initial_retry_delay: Duration::from_secs(10),
            config_fetch_delay: Duration::from_secs(5),
            ct_scan_interval: Duration::from_secs(10),
            plug_scan_interval: Duration::from_secs(5),
            probe_attempts: 3,
            probe_delay: Duration::from_secs(10),
        }
    }
}

/// Logging section of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter directive
    pub level: String,

    /// Optional log file (rotated daily)
    pub file: Option<String>,

    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

impl EwayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| EwayError::config(format!("Invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `EWAY_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = env::var("EWAY_WS_PORT") {
            self.websocket.port = port
                .parse()
                .map_err(|e| EwayError::config(format!("Invalid EWAY_WS_PORT: {e}")))?;
        }

        if let Ok(value) = env::var("EWAY_CONNECT_TIMEOUT") {
            self.websocket.connect_timeout = parse_duration("EWAY_CONNECT_TIMEOUT", &value)?;
        }

        if let Ok(value) = env::var("EWAY_SCAN_INTERVAL") {
            self.websocket.scan_interval = parse_duration("EWAY_SCAN_INTERVAL", &value)?;
        }

        if let Ok(value) = env::var("EWAY_MAX_RECONNECT_ATTEMPTS") {
            self.websocket.max_reconnect_attempts = value.parse().map_err(|e| {
                EwayError::config(format!("Invalid EWAY_MAX_RECONNECT_ATTEMPTS: {e}"))
            })?;
        }

        if let Ok(value) = env::var("EWAY_HTTP_TIMEOUT") {
            self.http.request_timeout = parse_duration("EWAY_HTTP_TIMEOUT", &value)?;
        }

        if let Ok(level) = env::var("RUST_LOG") {
            self.logging.level = level;
        }

        if let Ok(file) = env::var("EWAY_LOG_FILE") {
            self.logging.file = Some(file);
        }

        self.validate()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.websocket.port == 0 {
            return Err(EwayError::config("WebSocket port must be greater than zero"));
        }

        if self.websocket.connect_timeout.is_zero() || self.websocket.ping_timeout.is_zero() {
            return Err(EwayError::config("WebSocket timeouts must be greater than zero"));
        }

        if self.http.request_timeout.is_zero() || self.http.command_timeout.is_zero() {
            return Err(EwayError::config("HTTP timeouts must be greater than zero"));
        }

        if self.http.max_connection_retries == 0 || self.http.max_initial_attempts == 0 {
            return Err(EwayError::config("Retry bounds must be at least 1"));
        }

        Ok(())
    }
}

/// Accepts either humantime (`"10s"`, `"500ms"`) or bare seconds
fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime_serde::re::humantime::parse_duration(value)
        .map_err(|e| EwayError::config(format!("Invalid {name}: {e}")))
}
