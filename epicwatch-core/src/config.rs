//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/epicwatch/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/epicwatch/` (~/.config/epicwatch/)
//! - State/Logs: `$XDG_STATE_HOME/epicwatch/` (~/.local/state/epicwatch/)

use crate::error::{Error, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Workflow backend endpoints
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconnect backoff
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Ordering and dedup tuning
    #[serde(default)]
    pub sequencer: SequencerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the workflow backend lives
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Backend base URL (e.g., `http://127.0.0.1:8000`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the server-sent event stream
    #[serde(default = "default_events_path")]
    pub events_path: String,

    /// Path of the full project state snapshot
    #[serde(default = "default_state_path")]
    pub state_path: String,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Timeout for the state snapshot request in seconds.
    /// The event stream itself has no overall timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            events_path: default_events_path(),
            state_path: default_state_path(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    /// Full URL of the event stream
    pub fn events_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.events_path)
    }

    /// Full URL of the state snapshot
    pub fn state_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.state_path)
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_events_path() -> String {
    "/api/events".to_string()
}

fn default_state_path() -> String {
    "/api/state".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

/// Reconnect backoff bounds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    /// First (and floor) reconnect delay in milliseconds
    #[serde(default = "default_reconnect_base")]
    pub base_ms: u64,

    /// Maximum reconnect delay in milliseconds
    #[serde(default = "default_reconnect_ceiling")]
    pub ceiling_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: default_reconnect_base(),
            ceiling_ms: default_reconnect_ceiling(),
        }
    }
}

impl ReconnectConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.ceiling_ms)
    }
}

fn default_reconnect_base() -> u64 {
    1000
}

fn default_reconnect_ceiling() -> u64 {
    8000
}

/// Sequencer tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SequencerConfig {
    /// Number of applied event keys remembered for duplicate detection.
    ///
    /// Duplicates redelivered after more than this many distinct applied
    /// events in the same run are not recognised.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,

    /// Number of applied events kept for the activity feed
    #[serde(default = "default_recent_activity")]
    pub recent_activity: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            dedup_window: default_dedup_window(),
            recent_activity: default_recent_activity(),
        }
    }
}

fn default_dedup_window() -> usize {
    crate::sequencer::DEFAULT_DEDUP_WINDOW
}

fn default_recent_activity() -> usize {
    50
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let base_url = self.server.base_url.trim();
        if base_url.is_empty() {
            return Err(Error::Config("server.base_url must not be empty".to_string()));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "server.base_url must be an http(s) URL, got {:?}",
                base_url
            )));
        }
        for (name, path) in [
            ("server.events_path", &self.server.events_path),
            ("server.state_path", &self.server.state_path),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(format!("{} must start with '/'", name)));
            }
        }
        if self.reconnect.base_ms == 0 {
            return Err(Error::Config(
                "reconnect.base_ms must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.ceiling_ms < self.reconnect.base_ms {
            return Err(Error::Config(
                "reconnect.ceiling_ms must be at least reconnect.base_ms".to_string(),
            ));
        }
        if self.sequencer.dedup_window == 0 {
            return Err(Error::Config(
                "sequencer.dedup_window must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/epicwatch/config.toml` (~/.config/epicwatch/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("epicwatch").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/epicwatch/` (~/.local/state/epicwatch/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("epicwatch")
    }

    /// Returns today's log file path
    ///
    /// The daily appender rotates on the UTC date:
    /// `$XDG_STATE_HOME/epicwatch/epicwatch.YYYY-MM-DD.log`
    pub fn log_path() -> PathBuf {
        Self::log_path_for(Utc::now().date_naive())
    }

    /// Returns the log file written on `date`
    pub fn log_path_for(date: NaiveDate) -> PathBuf {
        Self::state_dir().join(format!("epicwatch.{}.log", date.format("%Y-%m-%d")))
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
