//! Configuration system for the `TaskPing` bot.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskping/config.toml`)
//! 4. Compiled defaults
//!
//! The bot token has no default; starting without one is a fatal error.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors that can occur when loading bot configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// No bot token was supplied by any layer.
    #[error("bot token is not configured (set [bot] token, --token or TASKPING_TOKEN)")]
    MissingToken,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BotConfigFile {
    bot: BotFileConfig,
    storage: StorageFileConfig,
    reminders: RemindersFileConfig,
    conversation: ConversationFileConfig,
    telegram: TelegramFileConfig,
}

/// `[bot]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BotFileConfig {
    token: Option<String>,
    admins: Option<Vec<String>>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    database_path: Option<PathBuf>,
}

/// `[reminders]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RemindersFileConfig {
    interval_secs: Option<u64>,
    delivery_timeout_secs: Option<u64>,
}

/// `[conversation]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConversationFileConfig {
    session_idle_secs: Option<u64>,
    accepted_extensions: Option<Vec<String>>,
}

/// `[telegram]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TelegramFileConfig {
    api_base: Option<String>,
    poll_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the bot.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "TaskPing deadline reminder bot")]
pub struct BotCliArgs {
    /// Path to config file (default: `~/.config/taskping/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Bot API token.
    #[arg(long, env = "TASKPING_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Comma-separated administrator handles; replaces the file's list.
    #[arg(long, env = "TASKPING_ADMINS", value_delimiter = ',')]
    pub admins: Vec<String>,

    /// Path to the SQLite database.
    #[arg(long, env = "TASKPING_DB")]
    pub database: Option<PathBuf>,

    /// Seconds between reminder scans.
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKPING_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Bot API token.
    pub token: String,
    /// Administrator handles, normalised without a leading `@`.
    pub admins: Vec<String>,
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Interval between reminder scans.
    pub tick_interval: Duration,
    /// Upper bound for a single reminder delivery.
    pub delivery_timeout: Duration,
    /// Idle time after which an authoring session is discarded.
    pub session_idle: Duration,
    /// File name suffixes accepted as task sheets.
    pub accepted_extensions: Vec<String>,
    /// Base URL of the Telegram Bot API.
    pub api_base: String,
    /// Long-poll timeout for `getUpdates`, in seconds.
    pub poll_timeout_secs: u64,
    /// Log level filter string.
    pub log_level: String,
    /// Optional log file.
    pub log_file: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            admins: Vec::new(),
            database_path: default_database_path(),
            tick_interval: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(10),
            session_idle: Duration::from_secs(30 * 60),
            accepted_extensions: [".xlsx", ".xls", ".csv", ".tsv"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            api_base: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 25,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl BotConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or if no layer supplies a bot token.
    pub fn load(cli: &BotCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        if config.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        Ok(config)
    }

    /// Resolve a `BotConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &BotCliArgs, file: &BotConfigFile) -> Self {
        let defaults = Self::default();

        let admins = if cli.admins.is_empty() {
            file.bot.admins.clone().unwrap_or(defaults.admins)
        } else {
            cli.admins.clone()
        };

        Self {
            token: cli
                .token
                .clone()
                .or_else(|| file.bot.token.clone())
                .unwrap_or(defaults.token),
            admins: normalize_admins(&admins),
            database_path: cli
                .database
                .clone()
                .or_else(|| file.storage.database_path.clone())
                .unwrap_or(defaults.database_path),
            tick_interval: cli
                .interval_secs
                .or(file.reminders.interval_secs)
                .map_or(defaults.tick_interval, Duration::from_secs),
            delivery_timeout: file
                .reminders
                .delivery_timeout_secs
                .map_or(defaults.delivery_timeout, Duration::from_secs),
            session_idle: file
                .conversation
                .session_idle_secs
                .map_or(defaults.session_idle, Duration::from_secs),
            accepted_extensions: file
                .conversation
                .accepted_extensions
                .clone()
                .unwrap_or(defaults.accepted_extensions),
            api_base: file
                .telegram
                .api_base
                .clone()
                .unwrap_or(defaults.api_base),
            poll_timeout_secs: file
                .telegram
                .poll_timeout_secs
                .unwrap_or(defaults.poll_timeout_secs),
            log_level: cli.log_level.clone(),
            log_file: cli.log_file.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Strips one leading `@`, trims, and drops empty entries.
fn normalize_admins(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|h| h.trim())
        .map(|h| h.strip_prefix('@').unwrap_or(h))
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_database_path() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from("taskping.db"),
        |dir| dir.join("taskping").join("taskping.db"),
    )
}

/// Load and parse a TOML config file for the bot.
fn load_config_file(explicit_path: Option<&Path>) -> Result<BotConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(BotConfigFile::default());
        };
        config_dir.join("taskping").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BotConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
