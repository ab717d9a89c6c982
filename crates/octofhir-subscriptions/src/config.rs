use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ChannelType;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub subscriptions: SubscriptionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Subscription validations
        if self.subscriptions.allowed_channels.is_empty() {
            return Err("subscriptions.allowed_channels must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// When false, evaluation returns no notifications
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Register the built-in topics when the engine is created
    #[serde(default = "default_load_builtin_topics")]
    pub load_builtin_topics: bool,
    /// Channels subscriptions may use, e.g. ["rest-hook", "websocket"]
    #[serde(default = "default_allowed_channels")]
    pub allowed_channels: Vec<ChannelType>,
}
fn default_enabled() -> bool {
    true
}
fn default_load_builtin_topics() -> bool {
    true
}
fn default_allowed_channels() -> Vec<ChannelType> {
    vec![ChannelType::RestHook, ChannelType::WebSocket, ChannelType::Email]
}
impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            load_builtin_topics: default_load_builtin_topics(),
            allowed_channels: default_allowed_channels(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[source] config::ConfigError),

    #[error("config deserialize error: {0}")]
    Deserialize(#[source] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub mod loader {
    use super::{ConfigError, EngineConfig};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<EngineConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("octofhir-subscriptions.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., OCTOFHIR__SUBSCRIPTIONS__ENABLED=false
        builder = builder.add_source(
            Environment::with_prefix("OCTOFHIR")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder.build().map_err(ConfigError::Build)?;
        let merged: EngineConfig = cfg.try_deserialize().map_err(ConfigError::Deserialize)?;
        merged.validate().map_err(ConfigError::Invalid)?;
        Ok(merged)
    }
}
