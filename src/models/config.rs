//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Environment variable that overrides `notifier.bot_token`.
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Dispatch loop and retry policy
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Leaderboard API client settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Outbound messaging settings
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Snapshot and entity file locations
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is missing or invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self::load(path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {}: {}. Using defaults.",
                path.display(),
                e
            );
            let mut config = Self::default();
            config.apply_env();
            config
        })
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.notifier.bot_token = token;
            }
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.tick_interval_secs == 0 {
            return Err(AppError::validation("scheduler.tick_interval_secs must be > 0"));
        }
        if s.refresh_interval_secs == 0 {
            return Err(AppError::validation(
                "scheduler.refresh_interval_secs must be > 0",
            ));
        }
        if s.max_backoff_secs == 0 {
            return Err(AppError::validation("scheduler.max_backoff_secs must be > 0"));
        }
        if s.parse_alert_threshold == 0 {
            return Err(AppError::validation(
                "scheduler.parse_alert_threshold must be > 0",
            ));
        }
        if self.fetch.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetch.user_agent is empty"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        url::Url::parse(&self.fetch.base_url)?;
        url::Url::parse(&self.notifier.api_base)?;
        if self.notifier.bot_token.trim().is_empty() {
            return Err(AppError::validation(format!(
                "notifier.bot_token is empty (set it in the config or {BOT_TOKEN_ENV})"
            )));
        }
        if !self.notifier.bot_token.contains(':') {
            return Err(AppError::validation(
                "notifier.bot_token should look like 'TOKEN_ID:TOKEN_STRING'",
            ));
        }
        Ok(())
    }
}

/// Dispatch loop and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the dispatch loop scans for due entities
    #[serde(default = "defaults::tick_interval")]
    pub tick_interval_secs: u64,

    /// How often the entity list is reconciled with the config collaborator
    #[serde(default = "defaults::refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Upper bound for the failure backoff
    #[serde(default = "defaults::max_backoff")]
    pub max_backoff_secs: u64,

    /// Consecutive failures tolerated before an auth/not-found entity is disabled
    #[serde(default = "defaults::disable_threshold")]
    pub disable_threshold: u32,

    /// Consecutive parse failures before the operator is alerted
    #[serde(default = "defaults::parse_alert_threshold")]
    pub parse_alert_threshold: u32,

    /// How long shutdown waits for in-flight polls
    #[serde(default = "defaults::shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Poll newly registered entities right away instead of after one interval
    #[serde(default)]
    pub poll_on_start: bool,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: defaults::tick_interval(),
            refresh_interval_secs: defaults::refresh_interval(),
            max_backoff_secs: defaults::max_backoff(),
            disable_threshold: defaults::disable_threshold(),
            parse_alert_threshold: defaults::parse_alert_threshold(),
            shutdown_grace_secs: defaults::shutdown_grace(),
            poll_on_start: false,
        }
    }
}

/// Leaderboard API client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Site root, e.g. `https://adventofcode.com`
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Outbound messaging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Bot API root
    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    /// Bot token; `TELEGRAM_BOT_TOKEN` wins when set
    #[serde(default)]
    pub bot_token: String,

    /// Pause between the parts of a split message
    #[serde(default = "defaults::message_delay")]
    pub message_delay_ms: u64,

    /// Destination for operator alerts (anomalies, persistent parse failures)
    #[serde(default)]
    pub operator_destination: Option<String>,
}

impl NotifierConfig {
    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.message_delay_ms)
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::api_base(),
            bot_token: String::new(),
            message_delay_ms: defaults::message_delay(),
            operator_destination: None,
        }
    }
}

/// Snapshot and entity file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one snapshot record per entity
    #[serde(default = "defaults::state_dir")]
    pub state_dir: PathBuf,

    /// TOML file listing the monitored entities
    #[serde(default = "defaults::entities_file")]
    pub entities_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: defaults::state_dir(),
            entities_file: defaults::entities_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Scheduler defaults
    pub fn tick_interval() -> u64 {
        5
    }
    pub fn refresh_interval() -> u64 {
        60
    }
    pub fn max_backoff() -> u64 {
        30 * 60
    }
    pub fn disable_threshold() -> u32 {
        5
    }
    pub fn parse_alert_threshold() -> u32 {
        3
    }
    pub fn shutdown_grace() -> u64 {
        10
    }

    // Fetch defaults
    pub fn base_url() -> String {
        "https://adventofcode.com".into()
    }
    pub fn user_agent() -> String {
        concat!("starwatch/", env!("CARGO_PKG_VERSION")).into()
    }
    pub fn timeout() -> u64 {
        10
    }

    // Notifier defaults
    pub fn api_base() -> String {
        "https://api.telegram.org".into()
    }
    pub fn message_delay() -> u64 {
        500
    }

    // Storage defaults
    pub fn state_dir() -> PathBuf {
        PathBuf::from("data/state")
    }
    pub fn entities_file() -> PathBuf {
        PathBuf::from("data/entities.toml")
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
