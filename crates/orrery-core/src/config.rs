/*!
 * Configuration management for Orrery.
 *
 * This module loads and exposes the settings shared by the INDI client,
 * the Alpaca bridge, Alpaca discovery and the event hub. Values are layered:
 * built-in defaults, then an optional configuration file, then environment
 * variables.
 */
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Root configuration for Orrery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// INDI client configuration
    #[serde(default)]
    pub indi: IndiConfig,

    /// Alpaca bridge configuration
    #[serde(default)]
    pub alpaca: AlpacaConfig,

    /// Alpaca discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Event hub configuration
    #[serde(default)]
    pub hub: HubConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to use JSON format for logs
    #[serde(default)]
    pub json_format: bool,
}

/// INDI client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndiConfig {
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum number of messages buffered for devices whose driver is not yet known
    #[serde(default = "default_max_pending_messages")]
    pub max_pending_messages: usize,

    /// Number of driver messages retained per device
    #[serde(default = "default_message_log_capacity")]
    pub message_log_capacity: usize,

    /// Extra driver executable to device type mappings (e.g. `indi_mycam = "camera"`)
    #[serde(default)]
    pub drivers: HashMap<String, String>,
}

/// Alpaca bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlpacaConfig {
    /// Target period of each device refresher in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout of a single REST request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// ClientID sent with every request
    #[serde(default = "default_client_id")]
    pub client_id: u32,
}

/// Alpaca discovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// UDP port Alpaca servers listen on
    #[serde(default = "default_discovery_port")]
    pub port: u16,

    /// Whether to also probe the IPv6 multicast group
    #[serde(default = "default_true")]
    pub ipv6: bool,

    /// Whether to probe interface broadcast addresses and 255.255.255.255
    #[serde(default = "default_true")]
    pub broadcast: bool,

    /// Additional unicast targets (`host` or `host:port`)
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Event hub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Throttle period in milliseconds
    #[serde(default = "default_throttle_period_ms")]
    pub throttle_period_ms: u64,

    /// Listen idle window in milliseconds
    #[serde(default = "default_listen_idle_ms")]
    pub listen_idle_ms: u64,

    /// Capacity of the downstream broadcast channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for IndiConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            max_pending_messages: default_max_pending_messages(),
            message_log_capacity: default_message_log_capacity(),
            drivers: HashMap::new(),
        }
    }
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            client_id: default_client_id(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            ipv6: true,
            broadcast: true,
            targets: Vec::new(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            throttle_period_ms: default_throttle_period_ms(),
            listen_idle_ms: default_listen_idle_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl IndiConfig {
    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl AlpacaConfig {
    /// Refresher period as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl HubConfig {
    /// Throttle period as a [`Duration`]
    pub fn throttle_period(&self) -> Duration {
        Duration::from_millis(self.throttle_period_ms)
    }

    /// Listen idle window as a [`Duration`]
    pub fn listen_idle(&self) -> Duration {
        Duration::from_millis(self.listen_idle_ms)
    }
}

impl Config {
    /// Parse a configuration from TOML text, filling missing values with defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_max_pending_messages() -> usize {
    2048
}

fn default_message_log_capacity() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_client_id() -> u32 {
    (Uuid::new_v4().as_u128() & u128::from(u32::MAX)) as u32
}

fn default_discovery_port() -> u16 {
    32227
}

fn default_true() -> bool {
    true
}

fn default_throttle_period_ms() -> u64 {
    1000
}

fn default_listen_idle_ms() -> u64 {
    60_000
}

fn default_channel_capacity() -> usize {
    1024
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
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

    /// Override with an existing config
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        if let Some(config) = self.override_with {
            return Ok(config);
        }

        let mut config_builder = ConfigLib::builder();

        let default_config = Config::default();
        config_builder = config_builder.add_source(
            ConfigLib::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

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

        let config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone, Default)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}
