//! Inbound message and validated telemetry record types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message exactly as the broker delivered it
///
/// Created once per inbound publish and handed to the validator by value.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    /// Create a message stamped with the current time
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::received_at(topic, payload, Utc::now())
    }

    pub fn received_at(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at,
        }
    }

    /// Payload rendered for logs, invalid UTF-8 replaced
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Validated `/average` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AverageRecord {
    pub node_id: String,
    pub aggregation_result: String,
}

/// Validated `/energy` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyRecord {
    pub node_id: String,
    pub energy_optimal: String,
    pub energy_original: String,
    pub details: String,
}

/// A telemetry record that passed schema validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Average(AverageRecord),
    Energy(EnergyRecord),
}

impl TelemetryRecord {
    pub fn node_id(&self) -> &str {
        match self {
            TelemetryRecord::Average(record) => &record.node_id,
            TelemetryRecord::Energy(record) => &record.node_id,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            TelemetryRecord::Average(_) => super::AVERAGE_TOPIC,
            TelemetryRecord::Energy(_) => super::ENERGY_TOPIC,
        }
    }
}
