//! Configuration management utilities

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogFormat;

/// Environment variable selecting the deployment environment
pub const ENV_VAR: &str = "PANEL_ENV";
/// Environment variable selecting the log format
pub const LOG_FORMAT_VAR: &str = "PANEL_LOG_FORMAT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown log format '{0}', expected 'pretty' or 'json'")]
    InvalidLogFormat(String),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Application name
    pub app_name: String,
    /// Environment (dev, prod, etc.)
    pub environment: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "panel-rs".to_string(),
            environment: "development".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Defaults overridden by `PANEL_ENV` and `PANEL_LOG_FORMAT`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(environment) = lookup(ENV_VAR) {
            config.environment = environment;
        }
        if let Some(format) = lookup(LOG_FORMAT_VAR) {
            config.log_format = format.parse()?;
        }
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.as_str(), "prod" | "production")
    }
}
