//! Topic-aware payload validation
//!
//! Converts a [`RawMessage`] into a [`ValidationOutcome`]. Validation is pure:
//! the same message always yields the same outcome, and nothing is logged or
//! forwarded from here. Each topic has an explicit field list that is checked
//! for presence and type without coercion. Extra fields are ignored.

use crate::protocol::{AverageRecord, EnergyRecord, RawMessage, TelemetryRecord, TelemetryTopic};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Why a single field failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldViolation {
    #[error("missing field: {0}")]
    Missing(&'static str),
    #[error("mistyped field: {field} (expected string, found {found})")]
    Mistyped {
        field: &'static str,
        found: &'static str,
    },
}

impl FieldViolation {
    pub fn field(&self) -> &'static str {
        match self {
            FieldViolation::Missing(field) => field,
            FieldViolation::Mistyped { field, .. } => field,
        }
    }
}

/// Per-message validation failure
///
/// Never propagated past the validator; it is folded into a [`Rejection`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unrecognized topic")]
    UnrecognizedTopic { topic: String },
    #[error("malformed payload")]
    MalformedPayload { detail: String },
    #[error("{}", describe_violations(.0))]
    SchemaMismatch(Vec<FieldViolation>),
}

impl ValidationError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            ValidationError::UnrecognizedTopic { .. } => RejectionKind::UnrecognizedTopic,
            ValidationError::MalformedPayload { .. } => RejectionKind::MalformedPayload,
            ValidationError::SchemaMismatch(_) => RejectionKind::SchemaMismatch,
        }
    }
}

fn describe_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Rejection categories, kept distinct for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    UnrecognizedTopic,
    MalformedPayload,
    SchemaMismatch,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::UnrecognizedTopic => "unrecognized_topic",
            RejectionKind::MalformedPayload => "malformed_payload",
            RejectionKind::SchemaMismatch => "schema_mismatch",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message that did not validate, with the offending input attached
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub reason: String,
    pub error: ValidationError,
    pub raw: RawMessage,
}

/// Result of validating exactly one [`RawMessage`]
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid(TelemetryRecord),
    Rejected(Rejection),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }

    /// Rejection reason, `None` for valid records
    pub fn reason(&self) -> Option<&str> {
        match self {
            ValidationOutcome::Valid(_) => None,
            ValidationOutcome::Rejected(rejection) => Some(&rejection.reason),
        }
    }
}

/// Stateless validator for telemetry payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageValidator;

impl MessageValidator {
    pub fn validate(raw: &RawMessage) -> ValidationOutcome {
        match Self::decode(&raw.topic, &raw.payload) {
            Ok(record) => ValidationOutcome::Valid(record),
            Err(error) => ValidationOutcome::Rejected(Rejection {
                kind: error.kind(),
                reason: error.to_string(),
                error,
                raw: raw.clone(),
            }),
        }
    }

    /// Decode a payload for a topic into a typed record
    ///
    /// The topic is resolved before the payload is parsed, so an unknown topic
    /// is reported as such regardless of what it carries.
    pub fn decode(topic: &str, payload: &[u8]) -> Result<TelemetryRecord, ValidationError> {
        let telemetry_topic =
            TelemetryTopic::from_topic(topic).ok_or_else(|| ValidationError::UnrecognizedTopic {
                topic: topic.to_string(),
            })?;

        let object = parse_object(payload)?;
        let mut fields = FieldReader::new(&object);

        match telemetry_topic {
            TelemetryTopic::Average => {
                let node_id = fields.string("node_id");
                let aggregation_result = fields.string("aggregation_result");
                match (node_id, aggregation_result) {
                    (Some(node_id), Some(aggregation_result)) => {
                        Ok(TelemetryRecord::Average(AverageRecord {
                            node_id,
                            aggregation_result,
                        }))
                    }
                    _ => Err(fields.into_error()),
                }
            }
            TelemetryTopic::Energy => {
                let node_id = fields.string("node_id");
                let energy_optimal = fields.string("energy_optimal");
                let energy_original = fields.string("energy_original");
                let details = fields.string("details");
                match (node_id, energy_optimal, energy_original, details) {
                    (
                        Some(node_id),
                        Some(energy_optimal),
                        Some(energy_original),
                        Some(details),
                    ) => Ok(TelemetryRecord::Energy(EnergyRecord {
                        node_id,
                        energy_optimal,
                        energy_original,
                        details,
                    })),
                    _ => Err(fields.into_error()),
                }
            }
        }
    }
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, ValidationError> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(ValidationError::MalformedPayload {
            detail: format!("expected a JSON object, found {}", json_type_name(&other)),
        }),
        Err(e) => Err(ValidationError::MalformedPayload {
            detail: e.to_string(),
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Collects every field violation instead of stopping at the first one
struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    violations: Vec<FieldViolation>,
}

impl<'a> FieldReader<'a> {
    fn new(object: &'a Map<String, Value>) -> Self {
        Self {
            object,
            violations: Vec::new(),
        }
    }

    fn string(&mut self, field: &'static str) -> Option<String> {
        match self.object.get(field) {
            Some(Value::String(value)) => Some(value.clone()),
            Some(other) => {
                self.violations.push(FieldViolation::Mistyped {
                    field,
                    found: json_type_name(other),
                });
                None
            }
            None => {
                self.violations.push(FieldViolation::Missing(field));
                None
            }
        }
    }

    fn into_error(self) -> ValidationError {
        ValidationError::SchemaMismatch(self.violations)
    }
}
