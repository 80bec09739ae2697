//! Configuration management for the plugin host.
//!
//! Loads host settings from a TOML file and applies command-line overrides.

use crate::cli::CliArgs;
use plugin_lifecycle::DEFAULT_PERSISTENT_DIR;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

fn default_persistent_dir() -> String {
    DEFAULT_PERSISTENT_DIR.to_string()
}

fn default_enabled() -> Vec<String> {
    vec![plugin_echo::ECHO_PLUGIN_NAME.to_string()]
}

fn default_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Plugin configuration settings
    #[serde(default)]
    pub plugins: PluginSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Plugin configuration.
///
/// Controls where plugin state lives and which built-in plugins are loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Root directory; each plugin gets `<persistent_dir>/<name>`
    #[serde(default = "default_persistent_dir")]
    pub persistent_dir: String,
    /// Plugins to load, in load order
    #[serde(default = "default_enabled")]
    pub enabled: Vec<String>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            persistent_dir: default_persistent_dir(),
            enabled: default_enabled(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            plugins: PluginSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, writing a default file when
    /// none exists yet.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of file settings.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(data_dir) = &args.data_dir {
            self.plugins.persistent_dir = data_dir.to_string_lossy().to_string();
        }

        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }

        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Root directory for plugin working directories
    pub fn persistent_root(&self) -> PathBuf {
        PathBuf::from(&self.plugins.persistent_dir)
    }

    /// Validates the configuration for correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.plugins.persistent_dir.trim().is_empty() {
            return Err("Persistent directory cannot be empty".to_string());
        }

        if self.plugins.enabled.iter().any(|name| name.trim().is_empty()) {
            return Err("Enabled plugin names cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
