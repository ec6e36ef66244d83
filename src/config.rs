//! Configuration system for MQTT presence nodes
//!
//! Configuration comes from an optional TOML file; every field has a default
//! so a node can start with no file at all. Command-line flags are applied on
//! top with [`NodeConfig::apply_overrides`].

use crate::node::state::MIN_SCAN_RATE_SECS;
use crate::protocol::validate_application_id;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Main node configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub sensors: SensorsSection,
}

/// Node section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// Application identifier; defaults to the host name when absent
    pub application_id: Option<String>,
    /// Initial scan rate in seconds (must be >= 1.0)
    #[serde(default = "default_scan_rate")]
    pub scan_rate_secs: f64,
    /// Publish a retained `STATE = DEAD` before a clean disconnect
    #[serde(default = "default_true")]
    pub publish_dead_on_exit: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            application_id: None,
            scan_rate_secs: default_scan_rate(),
            publish_dead_on_exit: true,
        }
    }
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker host name
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,
    /// MQTT keep alive in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long `connect()` waits for the first ConnAck
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Capacity of the bounded inbound event queue
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Sensor source section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorsSection {
    /// Command whose output is parsed for readings (lm-sensors format)
    #[serde(default = "default_sensors_command")]
    pub command: String,
}

impl Default for SensorsSection {
    fn default() -> Self {
        Self {
            command: default_sensors_command(),
        }
    }
}

fn default_scan_rate() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_event_capacity() -> usize {
    100
}

fn default_sensors_command() -> String {
    "sensors".to_string()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid application ID: {0}")]
    InvalidApplicationId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to read host name: {0}")]
    HostName(#[source] std::io::Error),
}

/// Values given on the command line; `None` keeps the file/default value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub application_id: Option<String>,
    pub scan_rate_secs: Option<f64>,
    pub sensors_command: Option<String>,
}

impl NodeConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the loaded values
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.host {
            self.mqtt.host = host;
        }
        if let Some(port) = overrides.port {
            self.mqtt.port = port;
        }
        if let Some(application_id) = overrides.application_id {
            self.node.application_id = Some(application_id);
        }
        if let Some(scan_rate) = overrides.scan_rate_secs {
            self.node.scan_rate_secs = scan_rate;
        }
        if let Some(command) = overrides.sensors_command {
            self.sensors.command = command;
        }
    }

    /// Validate field ranges and the application id format
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(application_id) = &self.node.application_id {
            validate_application_id(application_id)
                .map_err(|e| ConfigError::InvalidApplicationId(e.to_string()))?;
        }

        let scan_rate = self.node.scan_rate_secs;
        if !scan_rate.is_finite() || scan_rate < MIN_SCAN_RATE_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "scan_rate_secs must be a number >= {MIN_SCAN_RATE_SECS}, got {scan_rate}"
            )));
        }

        if self.mqtt.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.port must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.event_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.event_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The configured application id, or one derived from the host name
    pub fn resolve_application_id(&self) -> Result<String, ConfigError> {
        let application_id = match &self.node.application_id {
            Some(id) => id.clone(),
            None => host_application_id()?,
        };
        validate_application_id(&application_id)
            .map_err(|e| ConfigError::InvalidApplicationId(e.to_string()))?;
        Ok(application_id)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[node]
application_id = "test-node"
scan_rate_secs = 1.0

[mqtt]
host = "localhost"
port = 1883
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Derive an application id from the host name, keeping only characters
/// that are valid in an id
fn host_application_id() -> Result<String, ConfigError> {
    let raw = hostname::get().map_err(ConfigError::HostName)?;
    Ok(sanitize_host_name(&raw.to_string_lossy()))
}

fn sanitize_host_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "node".to_string()
    } else {
        cleaned
    }
}
