//! Top-level error type for the ingestion node
//!
//! Per-message validation failures never reach this type; they are folded
//! into rejections by the pipeline.

use crate::config::ConfigError;
use crate::transport::mqtt::{CredentialError, SessionError};
use thiserror::Error;

/// Fatal errors surfaced to the binary
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Broker session error: {0}")]
    Session(SessionError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<SessionError> for IngestError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Credential(e) => IngestError::Credential(e),
            other => IngestError::Session(other),
        }
    }
}

impl IngestError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a later attempt could succeed without operator action
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Session(error) => error.is_transient(),
            _ => false,
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
