//! TOML configuration for the rover-link client.
//!
//! # Example file
//!
//! ```toml
//! [link]
//! signaling_url = "ws://127.0.0.1:5000/signaling"
//! channel_id = "sora"
//! ctrl_label = "#ctrl"
//! state_label = "#state"
//! connect_timeout_ms = 10000
//! heartbeat_interval_ms = 1000
//!
//! [reconnect]
//! max_attempts = 3
//! backoff_ms = [500, 1000, 2000, 4000, 8000]
//!
//! [playback]
//! delay_ms = 80
//! history_ms = 2000
//! max_extrapolation_ms = 150
//! status_interval_ms = 200
//! tick_hz = 60
//!
//! [stats]
//! log_interval_ms = 1000
//! verbose = false
//!
//! [log]
//! level = "info"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]`, so an empty file (or no
//! file at all) yields a working configuration and older files keep loading
//! when new fields are added.  CLI flags are applied on top by `main.rs`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rover_core::PlaybackConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parsed but are not usable together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub playback: PlaybackSection,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Session and channel settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSection {
    /// WebSocket URL of the signaling relay.  Empty means "not configured".
    #[serde(default)]
    pub signaling_url: String,
    #[serde(default = "default_channel_id")]
    pub channel_id: String,
    #[serde(default = "default_ctrl_label")]
    pub ctrl_label: String,
    #[serde(default = "default_state_label")]
    pub state_label: String,
    /// Handshake deadline per attempt.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Outbound heartbeat period; `0` disables heartbeats.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Opaque metadata forwarded to the relay on connect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Retry budget and backoff table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts before the loop idles.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait before retry `n` is `backoff_ms[n - 1]`, clamped to the last entry.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
}

/// Playback tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackSection {
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_history_ms")]
    pub history_ms: u64,
    #[serde(default = "default_max_extrapolation_ms")]
    pub max_extrapolation_ms: u64,
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
}

/// Throughput/latency logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsConfig {
    #[serde(default = "default_stats_interval_ms")]
    pub log_interval_ms: u64,
    /// Log a stats line even when nothing flowed.
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// `tracing` level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

pub const DEFAULT_CTRL_LABEL: &str = "#ctrl";
pub const DEFAULT_STATE_LABEL: &str = "#state";
/// Highest accepted playback rate; the ticker period is at least 1 ms.
pub const MAX_TICK_HZ: u32 = 1000;

fn default_channel_id() -> String {
    "sora".to_string()
}
fn default_ctrl_label() -> String {
    DEFAULT_CTRL_LABEL.to_string()
}
fn default_state_label() -> String {
    DEFAULT_STATE_LABEL.to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_heartbeat_interval_ms() -> u64 {
    1_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> Vec<u64> {
    vec![500, 1000, 2000, 4000, 8000]
}
fn default_delay_ms() -> u64 {
    80
}
fn default_history_ms() -> u64 {
    2000
}
fn default_max_extrapolation_ms() -> u64 {
    150
}
fn default_status_interval_ms() -> u64 {
    200
}
fn default_tick_hz() -> u32 {
    60
}
fn default_stats_interval_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            signaling_url: String::new(),
            channel_id: default_channel_id(),
            ctrl_label: default_ctrl_label(),
            state_label: default_state_label(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            metadata: None,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for PlaybackSection {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            history_ms: default_history_ms(),
            max_extrapolation_ms: default_max_extrapolation_ms(),
            status_interval_ms: default_status_interval_ms(),
            tick_hz: default_tick_hz(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            log_interval_ms: default_stats_interval_ms(),
            verbose: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Behaviour ─────────────────────────────────────────────────────────────────

impl LinkSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when heartbeats are disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// Rewrites both labels into their canonical `#`-prefixed form.
    pub fn normalize_labels(&mut self) {
        self.ctrl_label = normalize_label(&self.ctrl_label, DEFAULT_CTRL_LABEL);
        self.state_label = normalize_label(&self.state_label, DEFAULT_STATE_LABEL);
    }
}

impl ReconnectConfig {
    /// Delay before retrying after the `attempt`-th consecutive failure
    /// (1-based).  Attempts past the end of the table reuse its last entry.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) - 1) as usize;
        let ms = self
            .backoff_ms
            .get(index)
            .or_else(|| self.backoff_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

impl PlaybackSection {
    /// Period of the playback ticker, never shorter than 1 ms.
    pub fn tick_interval(&self) -> Duration {
        let hz = self.tick_hz.clamp(1, MAX_TICK_HZ);
        Duration::from_secs_f64(1.0 / f64::from(hz))
    }

    pub fn to_playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            delay_ms: self.delay_ms as f64,
            history_ms: self.history_ms as f64,
            max_extrapolation_ms: self.max_extrapolation_ms as f64,
            status_interval_ms: self.status_interval_ms as f64,
        }
    }
}

impl LinkConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut cfg: LinkConfig = toml::from_str(content)?;
        cfg.link.normalize_labels();
        Ok(cfg)
    }

    /// Loads the config at `path`, returning defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not found",
    /// and [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Checks that the values are usable together.
    ///
    /// The signaling URL is not checked here; only the binary requires it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.max_attempts must be at least 1".into(),
            ));
        }
        if self.reconnect.backoff_ms.is_empty() {
            return Err(ConfigError::Invalid(
                "reconnect.backoff_ms must not be empty".into(),
            ));
        }
        if self.playback.tick_hz == 0 || self.playback.tick_hz > MAX_TICK_HZ {
            return Err(ConfigError::Invalid(format!(
                "playback.tick_hz must be between 1 and {MAX_TICK_HZ}, got {}",
                self.playback.tick_hz
            )));
        }
        if self.playback.delay_ms >= self.playback.history_ms {
            return Err(ConfigError::Invalid(format!(
                "playback.delay_ms ({}) must be less than playback.history_ms ({})",
                self.playback.delay_ms, self.playback.history_ms
            )));
        }
        Ok(())
    }
}

/// Canonical form of a channel label: empty falls back to `default`, and a
/// missing leading `#` is added.
///
/// ```rust
/// use rover_link::domain::config::normalize_label;
///
/// assert_eq!(normalize_label("ctrl", "#ctrl"), "#ctrl");
/// assert_eq!(normalize_label("  ", "#state"), "#state");
/// assert_eq!(normalize_label("#cam", "#ctrl"), "#cam");
/// ```
pub fn normalize_label(label: &str, default: &str) -> String {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else if trimmed.starts_with('#') {
        trimmed.to_string()
    } else {
        format!("#{trimmed}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
