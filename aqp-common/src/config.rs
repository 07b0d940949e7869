//! Configuration loading and config file resolution
//!
//! Bootstrap configuration lives in a single TOML file with two sections:
//!
//! ```toml
//! [playback]
//! target_buffer_seconds = 0.5
//! buffer_count = 3
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Every field has a built-in default, so an empty (or absent) file is valid.
//!
//! # Config File Priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`AQP_CONFIG`)
//! 3. Per-user config directory (`~/.config/aqp/config.toml` on Linux)
//! 4. Built-in defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "AQP_CONFIG";

/// File name looked up inside the per-user config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Bootstrap configuration loaded from TOML file
///
/// Settings are read once at startup; the player must restart to pick up
/// changes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Buffer queue tuning
    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Buffer queue tuning
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// Seconds of audio each queue buffer should hold
    #[serde(default = "default_target_buffer_seconds")]
    pub target_buffer_seconds: f64,

    /// Number of buffers cycling through the output queue
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,

    /// Lower bound for a single buffer, in bytes
    #[serde(default = "default_min_buffer_bytes")]
    pub min_buffer_bytes: u32,

    /// Upper bound for a single buffer, in bytes
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: u32,

    /// Output gain applied to the queue (0.0 - 1.0)
    #[serde(default = "default_gain")]
    pub gain: f32,

    /// How long the host waits for in-flight buffers to drain after
    /// playback stops
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    /// How often the host polls the running flag
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Output device name (None = system default)
    #[serde(default)]
    pub device: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_target_buffer_seconds() -> f64 {
    0.5
}

fn default_buffer_count() -> usize {
    3
}

fn default_min_buffer_bytes() -> u32 {
    0x4000 // 16 KiB
}

fn default_max_buffer_bytes() -> u32 {
    0x50000 // 320 KiB
}

fn default_gain() -> f32 {
    1.0
}

fn default_drain_grace_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            target_buffer_seconds: default_target_buffer_seconds(),
            buffer_count: default_buffer_count(),
            min_buffer_bytes: default_min_buffer_bytes(),
            max_buffer_bytes: default_max_buffer_bytes(),
            gain: default_gain(),
            drain_grace_ms: default_drain_grace_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            device: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Check that `level` names a known tracing level
    pub fn validate(&self) -> Result<()> {
        let level = self.level.to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "Unknown log level '{}' (expected one of {})",
                self.level,
                LOG_LEVELS.join(", ")
            )))
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.logging.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine(PathBuf),
    Environment(PathBuf),
    UserConfigDir(PathBuf),
    BuiltInDefaults,
}

impl ConfigSource {
    /// Path of the file backing this source, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::UserConfigDir(p) => Some(p),
            ConfigSource::BuiltInDefaults => None,
        }
    }
}

/// Resolves and loads the bootstrap configuration file
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    app_dir: String,
    env_var: String,
}

impl ConfigResolver {
    /// Create a resolver looking under `<config_dir>/<app_dir>/config.toml`
    pub fn new(app_dir: &str) -> Self {
        Self {
            app_dir: app_dir.to_string(),
            env_var: CONFIG_ENV_VAR.to_string(),
        }
    }

    /// Override the environment variable consulted at priority 2
    pub fn with_env_var(mut self, env_var: &str) -> Self {
        self.env_var = env_var.to_string();
        self
    }

    /// Decide which configuration file to use.
    ///
    /// The per-user file only counts when it exists; explicit paths (CLI or
    /// environment) are returned as-is so a typo surfaces as an error.
    pub fn resolve(&self, cli_path: Option<&Path>) -> ConfigSource {
        if let Some(path) = cli_path {
            return ConfigSource::CommandLine(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(&self.env_var) {
            if !path.is_empty() {
                return ConfigSource::Environment(PathBuf::from(path));
            }
        }

        if let Some(path) = self.user_config_path() {
            if path.exists() {
                return ConfigSource::UserConfigDir(path);
            }
            debug!("No config file at {}", path.display());
        }

        ConfigSource::BuiltInDefaults
    }

    /// Resolve and load the configuration
    pub fn load(&self, cli_path: Option<&Path>) -> Result<(TomlConfig, ConfigSource)> {
        let source = self.resolve(cli_path);
        let config = match source.path() {
            Some(path) => TomlConfig::load(path)?,
            None => {
                info!("No configuration file found, using built-in defaults");
                TomlConfig::default()
            }
        };
        Ok((config, source))
    }

    fn user_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(&self.app_dir).join(CONFIG_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_queue_tuning() {
        let config = PlaybackConfig::default();
        assert_eq!(config.target_buffer_seconds, 0.5);
        assert_eq!(config.buffer_count, 3);
        assert_eq!(config.min_buffer_bytes, 16 * 1024);
        assert_eq!(config.max_buffer_bytes, 320 * 1024);
        assert_eq!(config.gain, 1.0);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config, TomlConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [playback]
            buffer_count = 4

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.playback.buffer_count, 4);
        assert_eq!(config.playback.target_buffer_seconds, 0.5);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let result = TomlConfig::from_toml_str("[logging]\nlevel = \"loud\"\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let result = TomlConfig::from_toml_str("[playback\nbuffer_count = 3");
        assert!(matches!(result, Err(Error::TomlParse(_))));
    }
}
