//! edge-ingest
//!
//! Telemetry ingestion for edge nodes: a persistent MQTT v5 session over
//! mutual TLS, subscribed to `/average` and `/energy`, whose inbound
//! publishes are validated into typed records and handed to a dispatch sink.
//!
//! # Overview
//!
//! - [`transport::mqtt`] - credentials, connect, reconnect with backoff, close
//! - [`processing`] - pure validation plus the ingest pipeline
//! - [`protocol`] - topics, raw messages and telemetry records
//! - [`observability`] - structured logging, metrics and the health server
//! - [`config`] - TOML configuration
//!
//! # Quick Start
//!
//! ```rust
//! use edge_ingest::processing::{MessageValidator, ValidationOutcome};
//! use edge_ingest::protocol::{RawMessage, TelemetryRecord};
//!
//! let raw = RawMessage::new(
//!     "/average",
//!     r#"{"node_id":"n1","aggregation_result":"42.0"}"#,
//! );
//!
//! match MessageValidator::validate(&raw) {
//!     ValidationOutcome::Valid(TelemetryRecord::Average(record)) => {
//!         assert_eq!(record.aggregation_result, "42.0");
//!     }
//!     other => panic!("unexpected outcome: {other:?}"),
//! }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod processing;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::IngestConfig;
pub use error::{IngestError, IngestResult};
pub use processing::{IngestPipeline, MessageValidator, ValidationOutcome};
pub use protocol::*;
pub use transport::mqtt::{SessionHandle, TransportSession};
