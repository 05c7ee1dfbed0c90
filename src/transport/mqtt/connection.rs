//! Pure connection state management for the broker session
//!
//! This module contains the session state machine types, the broker
//! endpoint, the reconnect backoff policy and the transport error types.

use super::credentials::CredentialError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default port for MQTT over TLS
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Connection state for the broker session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No live link, with the reason the last one ended
    Disconnected(DisconnectReason),
    /// Initial connection attempt in flight
    Connecting,
    /// CONNACK received, subscriptions issued
    Connected,
    /// Waiting for or performing reconnection attempt n
    Reconnecting(u32),
    /// Close requested, link being released
    ShuttingDown,
}

impl ConnectionState {
    /// Short lowercase label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected(_) => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting(_) => "reconnecting",
            ConnectionState::ShuttingDown => "shutting_down",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected(DisconnectReason::NeverConnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected(reason) => write!(f, "disconnected ({reason})"),
            ConnectionState::Reconnecting(attempt) => write!(f, "reconnecting (attempt {attempt})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Why the session is not connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    NeverConnected,
    /// Broker answered CONNACK with a non-success reason code
    Refused(u8),
    Handshake(String),
    Lost(String),
    /// No CONNACK within the connect timeout
    Timeout,
    /// Reconnect attempts ran out
    Exhausted(u32),
    /// Closed on request
    Closed,
}

impl DisconnectReason {
    /// Reason for a failed connection attempt
    pub fn from_session_error(error: &SessionError) -> Self {
        match error {
            SessionError::ConnectionRefused { code } => DisconnectReason::Refused(*code),
            SessionError::Handshake(detail) => DisconnectReason::Handshake(detail.clone()),
            SessionError::Timeout(_) => DisconnectReason::Timeout,
            SessionError::ReconnectExhausted { attempts } => DisconnectReason::Exhausted(*attempts),
            SessionError::ShutdownRequested => DisconnectReason::Closed,
            other => DisconnectReason::Lost(other.to_string()),
        }
    }
}

impl From<&LinkError> for DisconnectReason {
    fn from(error: &LinkError) -> Self {
        match error {
            LinkError::Refused(code) => DisconnectReason::Refused(*code),
            LinkError::Handshake(detail) => DisconnectReason::Handshake(detail.clone()),
            LinkError::Lost(detail) => DisconnectReason::Lost(detail.clone()),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::NeverConnected => f.write_str("never connected"),
            DisconnectReason::Refused(code) => write!(f, "refused with reason code {code:#04x}"),
            DisconnectReason::Handshake(detail) => write!(f, "TLS handshake failed: {detail}"),
            DisconnectReason::Lost(detail) => write!(f, "connection lost: {detail}"),
            DisconnectReason::Timeout => f.write_str("timed out waiting for CONNACK"),
            DisconnectReason::Exhausted(attempts) => {
                write!(f, "gave up after {attempts} reconnection attempts")
            }
            DisconnectReason::Closed => f.write_str("closed"),
        }
    }
}

/// Reconnection backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt
    pub initial_delay: Duration,
    /// Upper bound for the doubled delay
    pub max_delay: Duration,
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Treat TLS handshake failures during reconnect as retryable
    pub retry_on_handshake_failure: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: None,
            retry_on_handshake_failure: false,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based): initial * 2^(attempt-1), capped
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Total time spent sleeping if every attempt fails
    /// Returns None if unlimited retries are configured
    pub fn max_total_delay(&self) -> Option<Duration> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.backoff_delay(attempt))
                .sum()
        })
    }
}

/// Where the broker listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub keepalive: Duration,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16, keepalive: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            keepalive,
        }
    }

    /// Parse an `mqtts://host[:port]` URL; plain `mqtt://` is refused
    pub fn from_url(broker_url: &str, keepalive: Duration) -> Result<Self, SessionError> {
        let url = Url::parse(broker_url)
            .map_err(|e| SessionError::InvalidEndpoint(format!("{broker_url}: {e}")))?;

        if url.scheme() != "mqtts" {
            return Err(SessionError::InvalidEndpoint(format!(
                "{broker_url}: scheme must be mqtts, got {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| SessionError::InvalidEndpoint(format!("{broker_url}: missing host")))?;

        Ok(Self::new(
            host,
            url.port().unwrap_or(DEFAULT_TLS_PORT),
            keepalive,
        ))
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Failure reported by a live broker link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("connection refused with reason code {0:#04x}")]
    Refused(u8),
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    #[error("connection lost: {0}")]
    Lost(String),
}

/// Transport session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    #[error("Connection refused by broker (reason code {code:#04x})")]
    ConnectionRefused { code: u8 },
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("No CONNACK received within {0:?}")]
    Timeout(Duration),
    #[error("Gave up after {attempts} reconnection attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("Shutdown requested")]
    ShutdownRequested,
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
}

impl SessionError {
    /// Whether a later attempt could plausibly succeed
    ///
    /// Refusals are transient only for "server unavailable" (0x88) and
    /// "server busy" (0x89).
    pub fn is_transient(&self) -> bool {
        match self {
            SessionError::ConnectionLost(_) | SessionError::Timeout(_) => true,
            SessionError::ConnectionRefused { code } => matches!(code, 0x88 | 0x89),
            _ => false,
        }
    }
}

impl From<LinkError> for SessionError {
    fn from(error: LinkError) -> Self {
        match error {
            LinkError::Refused(code) => SessionError::ConnectionRefused { code },
            LinkError::Handshake(detail) => SessionError::Handshake(detail),
            LinkError::Lost(detail) => SessionError::ConnectionLost(detail),
        }
    }
}
