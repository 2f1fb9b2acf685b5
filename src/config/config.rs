use std::path::Path;

use dimse::RelayConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{LoggingConfig, StowConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid STOW-RS URL {0}")]
    InvalidUrl(String),

    #[error("Invalid HTTP header {0}")]
    InvalidHeader(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid relay configuration: {0}")]
    Relay(#[from] dimse::DimseError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stow: StowConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Config {
    /// Load and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML configuration text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stow.validate()?;
        if self.logging.log_to_file && self.logging.log_file_path.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "logging.log_file_path is required when log_to_file is enabled".to_string(),
            ));
        }
        self.relay.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}
