//! Telemetry topics and subscription declarations
//!
//! Edge nodes publish on two fixed topics. Topic names are matched exactly,
//! the same way the broker routes them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Aggregated sensor readings published by edge nodes
pub const AVERAGE_TOPIC: &str = "/average";

/// Energy consumption reports published by edge nodes
pub const ENERGY_TOPIC: &str = "/energy";

/// Topics this ingestion point knows how to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryTopic {
    Average,
    Energy,
}

impl TelemetryTopic {
    /// Resolve a broker topic name, `None` for anything unrecognized
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            AVERAGE_TOPIC => Some(Self::Average),
            ENERGY_TOPIC => Some(Self::Energy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Average => AVERAGE_TOPIC,
            Self::Energy => ENERGY_TOPIC,
        }
    }
}

impl fmt::Display for TelemetryTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MQTT delivery guarantee requested for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Error, PartialEq)]
#[error("QoS level must be 0, 1 or 2, got {0}")]
pub struct InvalidQos(pub u8);

impl TryFrom<u8> for QosLevel {
    type Error = InvalidQos;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(InvalidQos(other)),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

/// A topic of interest and the QoS to subscribe with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSubscription {
    pub topic: String,
    #[serde(default = "default_qos")]
    pub qos: QosLevel,
}

impl TopicSubscription {
    pub fn new(topic: impl Into<String>, qos: QosLevel) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }
}

fn default_qos() -> QosLevel {
    QosLevel::AtLeastOnce
}

/// The subscriptions an edge server declares when none are configured
pub fn default_subscriptions() -> Vec<TopicSubscription> {
    vec![
        TopicSubscription::new(AVERAGE_TOPIC, QosLevel::AtLeastOnce),
        TopicSubscription::new(ENERGY_TOPIC, QosLevel::AtLeastOnce),
    ]
}
