//! Thread-safe metrics collection system
//!
//! Atomic counters for the broker session, subscriptions and the ingest
//! pipeline. A process-wide collector is available through [`metrics()`];
//! tests construct their own [`MetricsCollector`] to stay isolated.

use crate::processing::RejectionKind;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics
pub struct MetricsCollector {
    // Session metrics
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    reconnections: AtomicU64,
    connection_start_time: AtomicU64,
    last_refusal_code: AtomicU64,

    // Subscription metrics
    subscriptions_succeeded: AtomicU64,
    subscriptions_failed: AtomicU64,

    // Ingest metrics
    messages_received: AtomicU64,
    messages_valid: AtomicU64,
    rejected_unrecognized_topic: AtomicU64,
    rejected_malformed_payload: AtomicU64,
    rejected_schema_mismatch: AtomicU64,
    last_message_time: AtomicU64,

    // Lifecycle
    session_state: Mutex<String>,
    uptime_start: AtomicU64,
    state_transitions: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            reconnections: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            last_refusal_code: AtomicU64::new(0),
            subscriptions_succeeded: AtomicU64::new(0),
            subscriptions_failed: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_valid: AtomicU64::new(0),
            rejected_unrecognized_topic: AtomicU64::new(0),
            rejected_malformed_payload: AtomicU64::new(0),
            rejected_schema_mismatch: AtomicU64::new(0),
            last_message_time: AtomicU64::new(0),
            session_state: Mutex::new("disconnected".to_string()),
            uptime_start: AtomicU64::new(current_timestamp()),
            state_transitions: AtomicU64::new(0),
        }
    }

    // Session metrics
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_failed(&self, refusal_code: Option<u8>) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
        if let Some(code) = refusal_code {
            self.last_refusal_code
                .store(u64::from(code), Ordering::Relaxed);
        }
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn reconnected(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    // Subscription metrics
    pub fn subscription_succeeded(&self) {
        self.subscriptions_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_failed(&self) {
        self.subscriptions_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Ingest metrics
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.last_message_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn message_valid(&self) {
        self.messages_valid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_rejected(&self, kind: RejectionKind) {
        let counter = match kind {
            RejectionKind::UnrecognizedTopic => &self.rejected_unrecognized_topic,
            RejectionKind::MalformedPayload => &self.rejected_malformed_payload,
            RejectionKind::SchemaMismatch => &self.rejected_schema_mismatch,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle metrics
    pub fn set_session_state(&self, state: &str) {
        if let Ok(mut current) = self.session_state.lock() {
            if *current != state {
                *current = state.to_string();
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Relaxed)
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let connection_start = self.connection_start_time.load(Ordering::Relaxed);
        let connection_duration_seconds = if connection_start == 0 {
            0
        } else {
            now.saturating_sub(connection_start)
        };

        let rejected_unrecognized_topic = self.rejected_unrecognized_topic.load(Ordering::Relaxed);
        let rejected_malformed_payload = self.rejected_malformed_payload.load(Ordering::Relaxed);
        let rejected_schema_mismatch = self.rejected_schema_mismatch.load(Ordering::Relaxed);

        let current_state = self
            .session_state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_else(|_| "unknown".to_string());

        MetricsSnapshot {
            session: SessionMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                reconnections: self.reconnections.load(Ordering::Relaxed),
                last_refusal_code: self.last_refusal_code.load(Ordering::Relaxed),
                connection_duration_seconds,
            },
            subscriptions: SubscriptionMetrics {
                succeeded: self.subscriptions_succeeded.load(Ordering::Relaxed),
                failed: self.subscriptions_failed.load(Ordering::Relaxed),
            },
            ingest: IngestMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_valid: self.messages_valid.load(Ordering::Relaxed),
                messages_rejected: rejected_unrecognized_topic
                    + rejected_malformed_payload
                    + rejected_schema_mismatch,
                rejected_unrecognized_topic,
                rejected_malformed_payload,
                rejected_schema_mismatch,
                last_message_time: self.last_message_time.load(Ordering::Relaxed),
            },
            lifecycle: LifecycleMetrics {
                current_state,
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub session: SessionMetrics,
    pub subscriptions: SubscriptionMetrics,
    pub ingest: IngestMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub reconnections: u64,
    pub last_refusal_code: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionMetrics {
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Serialize)]
pub struct IngestMetrics {
    pub messages_received: u64,
    pub messages_valid: u64,
    pub messages_rejected: u64,
    pub rejected_unrecognized_topic: u64,
    pub rejected_malformed_payload: u64,
    pub rejected_schema_mismatch: u64,
    pub last_message_time: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub uptime_seconds: u64,
    pub state_transitions: u64,
}

pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_session_metrics() {
        let collector = MetricsCollector::new();

        collector.connection_attempt();
        collector.connection_established();
        collector.connection_lost();
        collector.connection_attempt();
        collector.connection_failed(Some(0x87));
        collector.connection_attempt();
        collector.connection_established();
        collector.reconnected();

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.session.connection_attempts, 3);
        assert_eq!(snapshot.session.connections_established, 2);
        assert_eq!(snapshot.session.connection_failures, 1);
        assert_eq!(snapshot.session.connections_lost, 1);
        assert_eq!(snapshot.session.reconnections, 1);
        assert_eq!(snapshot.session.last_refusal_code, 0x87);
        assert!(snapshot.session.connected);
    }

    #[test]
    fn test_rejections_are_counted_by_kind() {
        let collector = MetricsCollector::new();

        for _ in 0..4 {
            collector.message_received();
        }
        collector.message_valid();
        collector.message_rejected(RejectionKind::MalformedPayload);
        collector.message_rejected(RejectionKind::SchemaMismatch);
        collector.message_rejected(RejectionKind::SchemaMismatch);

        let ingest = collector.get_metrics().ingest;
        assert_eq!(ingest.messages_received, 4);
        assert_eq!(ingest.messages_valid, 1);
        assert_eq!(ingest.messages_rejected, 3);
        assert_eq!(ingest.rejected_malformed_payload, 1);
        assert_eq!(ingest.rejected_schema_mismatch, 2);
        assert_eq!(ingest.rejected_unrecognized_topic, 0);
        assert_eq!(
            ingest.messages_received,
            ingest.messages_valid + ingest.messages_rejected
        );
    }

    #[test]
    fn test_state_transitions_only_count_changes() {
        let collector = MetricsCollector::new();

        collector.set_session_state("connecting");
        collector.set_session_state("connecting");
        collector.set_session_state("connected");

        let lifecycle = collector.get_metrics().lifecycle;
        assert_eq!(lifecycle.current_state, "connected");
        assert_eq!(lifecycle.state_transitions, 2);
    }

    #[test]
    fn test_concurrent_updates() {
        let collector = Arc::new(MetricsCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collector = collector.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.message_received();
                        collector.message_valid();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let ingest = collector.get_metrics().ingest;
        assert_eq!(ingest.messages_received, 800);
        assert_eq!(ingest.messages_valid, 800);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = MetricsCollector::new().get_metrics();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["session"]["connected"], false);
        assert_eq!(json["lifecycle"]["current_state"], "disconnected");
    }
}
