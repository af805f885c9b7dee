//! Configuration.
//!
//! Supports YAML files and environment variable overrides.

pub mod broker;
pub mod topology;

pub use broker::{connect, BrokerConfig, BrokerType};
pub use topology::{BindingConfig, DestinationType, ExchangeConfig, QueueConfig, TopologyConfig};

use serde::Deserialize;

use crate::error::{BrokerError, Result};

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "warren.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "WARREN_CONFIG";
/// Prefix for environment variable overrides (`WARREN__BROKER__URL`).
pub const CONFIG_ENV_PREFIX: &str = "WARREN";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "WARREN_LOG";

/// Application messaging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which broker to connect to.
    pub broker: BrokerConfig,
    /// Exchanges, queues and bindings to declare at startup.
    pub topology: TopologyConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `warren.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, `__` separated
    pub fn load(path: Option<&str>) -> Result<Self> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse configuration from a YAML document, without layering.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| BrokerError::Config(e.to_string()))
    }

    /// Config for tests: simulated broker on `url`.
    pub fn for_test(url: impl Into<String>) -> Self {
        Self {
            broker: BrokerConfig {
                url: url.into(),
                ..BrokerConfig::default()
            },
            topology: TopologyConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests;
