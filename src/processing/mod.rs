//! Telemetry processing
//!
//! Validation is pure and lives in [`validator`]. [`pipeline`] drains the
//! inbound channel, counts and logs outcomes, and hands valid records to a
//! [`DispatchSink`].

pub mod pipeline;
pub mod sink;
pub mod validator;

pub use pipeline::{IngestPipeline, PipelineStats};
pub use sink::{ChannelSink, DispatchSink, LoggingSink};
pub use validator::{
    FieldViolation, MessageValidator, Rejection, RejectionKind, ValidationError,
    ValidationOutcome,
};
