//! Configuration management for cloudclip
//!
//! This module handles loading, validating, and persisting the relay
//! settings. The configuration is read once at startup and shared read-only.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Environment variable pointing at an alternative config file
pub const CONFIG_ENV: &str = "CLOUDCLIP_CONFIG";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading or writing the config file
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),

    /// No platform config directory
    #[error("Could not determine the configuration directory")]
    NoConfigDir,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Name this client publishes under; also used to drop our own echoes
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Relay host, optionally with port (no scheme)
    #[serde(default = "default_url_base")]
    pub url_base: String,

    /// Topic to publish to and subscribe on
    #[serde(default = "default_url_topic")]
    pub url_topic: String,

    /// Bearer token for protected topics; empty disables auth
    #[serde(default)]
    pub token: String,

    /// Key combination that publishes the clipboard, modifiers first
    #[serde(default = "default_hotkeys")]
    pub hotkeys: Vec<String>,

    /// Use `wss`/`https`; disable only for a local relay
    #[serde(default = "default_tls")]
    pub tls: bool,

    /// Publish request and connect timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Reconnection settings for the subscription
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Reconnection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    /// Delay schedule between failed attempts
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Delay after a failed attempt (initial delay for exponential)
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,

    /// Upper bound for exponential backoff
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Exponential,
}

// Default value functions
fn default_client_name() -> String {
    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    if hostname.is_empty() {
        "cloudclip".to_string()
    } else {
        hostname
    }
}

fn default_url_base() -> String {
    "ntfy.sh".to_string()
}

fn default_url_topic() -> String {
    "hello".to_string()
}

fn default_hotkeys() -> Vec<String> {
    vec!["ctrl".to_string(), "shift".to_string(), "x".to_string()]
}

fn default_tls() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_delay_secs() -> u64 {
    5
}

fn default_max_delay_secs() -> u64 {
    60
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            delay_secs: default_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            url_base: default_url_base(),
            url_topic: default_url_topic(),
            token: String::new(),
            hotkeys: default_hotkeys(),
            tls: default_tls(),
            request_timeout_secs: default_request_timeout_secs(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration, writing a default file on first run
    ///
    /// Checks in order:
    /// 1. Explicit path (from `--config`)
    /// 2. Path from CLOUDCLIP_CONFIG environment variable
    /// 3. ~/.config/cloudclip/config.toml
    pub fn load_or_init(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => expand_path(path),
            None => Self::find_config_path()?,
        };

        if path.exists() {
            let config = Self::load_from_path(&path)?;
            info!("Loaded configuration from {}", path.display());
            return Ok(config);
        }

        info!("No config file at {}, writing defaults", path.display());
        let config = Self::default();
        config.save_to(&path)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join("cloudclip").join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    fn find_config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.is_empty() {
                return Ok(expand_path(Path::new(&path)));
            }
        }

        Self::default_path()
    }

    /// Check the invariants the sync engine relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "client_name must not be empty".to_string(),
            ));
        }

        if self.url_base.trim().is_empty() {
            return Err(ConfigError::Validation(
                "url_base must not be empty".to_string(),
            ));
        }
        if self.url_base.contains("://") || self.url_base.trim_end_matches('/').contains('/') {
            return Err(ConfigError::Validation(format!(
                "url_base must be a bare host such as `ntfy.sh`, got `{}`",
                self.url_base
            )));
        }

        if self.url_topic.trim().is_empty() {
            return Err(ConfigError::Validation(
                "url_topic must not be empty".to_string(),
            ));
        }
        if self.url_topic.trim_matches('/').contains('/') {
            return Err(ConfigError::Validation(format!(
                "url_topic must be a single path segment, got `{}`",
                self.url_topic
            )));
        }

        if self.hotkeys.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "hotkeys must contain at least one key".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Token to send as `Authorization: Bearer`, if any
    pub fn bearer_token(&self) -> Option<&str> {
        let token = self.token.trim();
        (!token.is_empty()).then_some(token)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Write configuration to the given path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        info!("Wrote configuration to {}", path.display());
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Example configuration file with comments
    pub fn generate_example() -> Result<String, ConfigError> {
        let config = Config::default();
        Ok(format!(
            r#"# cloudclip configuration
# Location: ~/.config/cloudclip/config.toml

# Name published with each clip; messages carrying this name are ignored
client_name = "{}"
# Relay host (ntfy-compatible), without scheme
url_base = "{}"
# Topic shared by all synced machines
url_topic = "{}"
# Access token for protected topics (empty = none)
token = ""
# Key combination that publishes the clipboard
hotkeys = {:?}
# Use wss/https
tls = {}
request_timeout_secs = {}

[reconnect]
# "fixed" or "exponential"
strategy = "fixed"
delay_secs = {}
max_delay_secs = {}
"#,
            config.client_name,
            config.url_base,
            config.url_topic,
            config.hotkeys,
            config.tls,
            config.request_timeout_secs,
            config.reconnect.delay_secs,
            config.reconnect.max_delay_secs,
        ))
    }
}

/// Expand tilde in path
fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(path_str.as_ref());
    PathBuf::from(expanded.into_owned())
}
