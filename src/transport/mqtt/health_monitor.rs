//! Pure health monitoring and reconnection logic for the broker session
//!
//! This module contains pure functions for reconnection decision making,
//! state transitions and transition logging.

use super::connection::{ConnectionState, DisconnectReason, ReconnectPolicy};
use std::time::Duration;
use tracing::{error, info, warn};

/// Silence on the subscribed topics longer than this is reported as stale
pub const MESSAGE_STALENESS_THRESHOLD: Duration = Duration::from_secs(300);

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted (pure function)
    /// Supports unlimited retries when max_attempts is None
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        policy: &ReconnectPolicy,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = policy.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay: policy.backoff_delay(attempt),
        }
    }

    /// Determine next state after connection event (pure function)
    pub fn determine_next_state(event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnectStarted => ConnectionState::Connecting,
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::ConnectionFailed(reason) => ConnectionState::Disconnected(reason),
            ConnectionEvent::ReconnectionStarted(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::ReconnectExhausted(attempts) => {
                ConnectionState::Disconnected(DisconnectReason::Exhausted(attempts))
            }
            ConnectionEvent::ShutdownStarted => ConnectionState::ShuttingDown,
            ConnectionEvent::Closed => ConnectionState::Disconnected(DisconnectReason::Closed),
        }
    }

    /// Check if connection state allows subscribing (pure function)
    pub fn can_subscribe(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("Broker connection established");
            }
            (ConnectionState::Reconnecting(attempt), ConnectionState::Connected) => {
                info!(attempt, "Reconnection successful");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                warn!(%reason, "Broker connection lost");
            }
            (_, ConnectionState::Disconnected(DisconnectReason::Exhausted(attempts))) => {
                error!(attempts, "Reconnection attempts exhausted, giving up");
            }
            (_, ConnectionState::Disconnected(DisconnectReason::Closed)) => {
                info!("Broker session closed");
            }
            (_, ConnectionState::Disconnected(reason)) => {
                warn!(%reason, "Broker connection attempt failed");
            }
            (_, ConnectionState::Reconnecting(attempt)) => {
                info!(attempt, "Starting reconnection attempt");
            }
            _ => {
                info!("Broker session state: {} -> {}", from, to);
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt after sleeping `delay`
    Proceed { attempt: u32, delay: Duration },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// First connection attempt started
    ConnectStarted,
    /// ConnAck received from broker
    ConnAckReceived,
    /// Attempt failed or live link dropped
    ConnectionFailed(DisconnectReason),
    /// Reconnection attempt started
    ReconnectionStarted(u32),
    /// Policy ran out of attempts
    ReconnectExhausted(u32),
    /// Close requested
    ShutdownStarted,
    /// Link released after close
    Closed,
}
