//! Configuration system for the edge ingestion point
//!
//! Loaded from a TOML file. Credential paths given relative are resolved
//! against the directory containing the config file.

use crate::protocol::{default_subscriptions, TopicSubscription};
use crate::transport::mqtt::{BrokerEndpoint, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Locations searched when no config file is given on the command line
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["edge-ingest.toml", "config/edge-ingest.toml"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    pub node: NodeSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default = "default_subscriptions")]
    pub topics: Vec<TopicSubscription>,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// Node section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// Node identifier (must match [a-zA-Z0-9._-]+), used as client id prefix
    pub id: String,
    #[serde(default)]
    pub description: String,
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtts://host[:port]`
    pub broker_url: String,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// How long to wait for CONNACK on each attempt
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    /// Bound of the channel between the session and the ingest pipeline
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_inbound_capacity() -> usize {
    256
}

/// Reconnect section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// None = retry until closed
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_on_handshake_failure: bool,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
            retry_on_handshake_failure: false,
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

/// Pipeline section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSection {
    /// Number of validation lanes; 1 validates inline
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_lane_capacity")]
    pub lane_capacity: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            lane_capacity: default_lane_capacity(),
        }
    }
}

fn default_workers() -> usize {
    1
}

fn default_lane_capacity() -> usize {
    64
}

/// Health server section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_health_port(),
        }
    }
}

fn default_health_port() -> u16 {
    8080
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("No config file found (searched {searched:?})")]
    NotFound { searched: Vec<PathBuf> },
    #[error("Invalid node ID format: {0}")]
    InvalidNodeId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IngestConfig {
    /// Load, resolve and validate configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse and validate configuration text; paths are left as written
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: IngestConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Use `explicit` if given, else the first default location that exists
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ConfigError::NotFound {
                searched: DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).collect(),
            })
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.mqtt.ca_cert,
            &mut self.mqtt.client_cert,
            &mut self.mqtt.client_key,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Check every field for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_node_id(&self.node.id)?;

        if self.mqtt.keepalive_secs == 0 {
            return Err(invalid("mqtt.keepalive_secs must be at least 1"));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(invalid("mqtt.connect_timeout_secs must be at least 1"));
        }
        if self.mqtt.inbound_capacity == 0 {
            return Err(invalid("mqtt.inbound_capacity must be greater than 0"));
        }
        self.endpoint()?;

        let reconnect = &self.reconnect;
        if reconnect.initial_delay_ms == 0 || reconnect.max_delay_ms == 0 {
            return Err(invalid("reconnect delays must be greater than 0"));
        }
        if reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(invalid(
                "reconnect.initial_delay_ms must not exceed reconnect.max_delay_ms",
            ));
        }
        if reconnect.max_attempts == Some(0) {
            return Err(invalid(
                "reconnect.max_attempts must be greater than 0 or omitted for unlimited",
            ));
        }

        if self.topics.is_empty() {
            return Err(invalid("at least one [[topics]] entry is required"));
        }
        let mut seen = HashSet::new();
        for subscription in &self.topics {
            if subscription.topic.is_empty() {
                return Err(invalid("topic names must not be empty"));
            }
            if !seen.insert(subscription.topic.as_str()) {
                return Err(invalid(&format!(
                    "topic {} is listed more than once",
                    subscription.topic
                )));
            }
        }

        if self.pipeline.workers == 0 {
            return Err(invalid("pipeline.workers must be at least 1"));
        }
        if self.pipeline.lane_capacity == 0 {
            return Err(invalid("pipeline.lane_capacity must be greater than 0"));
        }

        Ok(())
    }

    /// Broker endpoint parsed from `mqtt.broker_url`
    pub fn endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        BrokerEndpoint::from_url(
            &self.mqtt.broker_url,
            Duration::from_secs(self.mqtt.keepalive_secs),
        )
        .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
            retry_on_handshake_failure: self.reconnect.retry_on_handshake_failure,
        }
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[node]
id = "edge-test"
description = "Edge server under test"

[mqtt]
broker_url = "mqtts://localhost:8883"
ca_cert = "certs/ca.crt"
client_cert = "certs/server.crt"
client_key = "certs/server.key"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::InvalidConfig(message.to_string())
}

/// Validate node ID format
fn validate_node_id(node_id: &str) -> Result<(), ConfigError> {
    let valid_chars = node_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if node_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidNodeId(format!(
            "Node ID '{node_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
