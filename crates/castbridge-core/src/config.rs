/*!
 * Configuration management for castbridge.
 *
 * This module provides functionality to load, validate, and access
 * configuration settings for the bridge.
 */
use std::path::Path;
use std::sync::Arc;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Message bus (broker) configuration
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Topic namespace configuration
    #[serde(default)]
    pub topics: TopicConfig,

    /// Per-device session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker address
    #[serde(default = "default_broker_address")]
    pub broker_address: String,

    /// Broker port
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,

    /// Optional broker username
    #[serde(default)]
    pub username: Option<String>,

    /// Optional broker password
    #[serde(default)]
    pub password: Option<String>,
}

/// Topic namespace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Root segment of every topic (`<root>/<device>/<attribute>`)
    #[serde(default = "default_topic_root")]
    pub root: String,
}

/// Per-device session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Capacity of the session command mailbox; producers block when full
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Consecutive connection failures tolerated before a session is
    /// declared dead
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            topics: TopicConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_address: default_broker_address(),
            broker_port: default_broker_port(),
            username: None,
            password: None,
        }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            root: default_topic_root(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_broker_address() -> String {
    "127.0.0.1".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_topic_root() -> String {
    "chromecast".to_string()
}

fn default_mailbox_capacity() -> usize {
    100
}

fn default_failure_threshold() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A builder for creating a bridge configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<BridgeConfig> {
        let mut config_builder = ConfigLib::builder();

        // Start with default values
        let default_config = BridgeConfig::default();
        config_builder = config_builder.add_source(
            config::Config::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        // Add configuration from file if specified
        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        // Add configuration from environment variables if prefix is specified
        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let config: BridgeConfig = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<BridgeConfig>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: BridgeConfig) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &BridgeConfig {
        &self.0
    }
}

impl From<BridgeConfig> for SharedConfig {
    fn from(config: BridgeConfig) -> Self {
        Self::new(config)
    }
}

impl AsRef<BridgeConfig> for SharedConfig {
    fn as_ref(&self) -> &BridgeConfig {
        self.get()
    }
}
