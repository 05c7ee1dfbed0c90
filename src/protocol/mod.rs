//! Telemetry protocol types: topics, raw messages and validated records

pub mod records;
pub mod topics;

pub use records::*;
pub use topics::*;
