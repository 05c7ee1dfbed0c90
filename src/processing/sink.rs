//! Downstream destinations for validated telemetry

use super::validator::{Rejection, ValidationOutcome};
use crate::protocol::TelemetryRecord;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Where validated records go once the pipeline is done with them
///
/// `reject` is informational; the pipeline already logs and counts every
/// rejection before calling it.
#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn dispatch(&self, record: TelemetryRecord);

    async fn reject(&self, _rejection: &Rejection) {}
}

/// Emits one structured log line per record
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl DispatchSink for LoggingSink {
    async fn dispatch(&self, record: TelemetryRecord) {
        match &record {
            TelemetryRecord::Average(average) => {
                info!(
                    topic = record.topic(),
                    node_id = %average.node_id,
                    aggregation_result = %average.aggregation_result,
                    "Average telemetry"
                );
            }
            TelemetryRecord::Energy(energy) => {
                info!(
                    topic = record.topic(),
                    node_id = %energy.node_id,
                    energy_optimal = %energy.energy_optimal,
                    energy_original = %energy.energy_original,
                    details = %energy.details,
                    "Energy telemetry"
                );
            }
        }
    }
}

/// Forwards every outcome, valid or not, to a channel
///
/// Used by embedders that post-process outcomes themselves. A closed
/// receiver is not an error; outcomes are dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ValidationOutcome>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ValidationOutcome>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl DispatchSink for ChannelSink {
    async fn dispatch(&self, record: TelemetryRecord) {
        if self.tx.send(ValidationOutcome::Valid(record)).await.is_err() {
            debug!("Outcome receiver closed, record dropped");
        }
    }

    async fn reject(&self, rejection: &Rejection) {
        if self
            .tx
            .send(ValidationOutcome::Rejected(rejection.clone()))
            .await
            .is_err()
        {
            debug!("Outcome receiver closed, rejection dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::MessageValidator;
    use crate::protocol::{AverageRecord, RawMessage};

    #[tokio::test]
    async fn test_channel_sink_forwards_both_outcomes() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);

        let record = TelemetryRecord::Average(AverageRecord {
            node_id: "n1".to_string(),
            aggregation_result: "42".to_string(),
        });
        sink.dispatch(record.clone()).await;

        let outcome = MessageValidator::validate(&RawMessage::new("/other", "{}"));
        let ValidationOutcome::Rejected(rejection) = outcome else {
            panic!("expected a rejection");
        };
        sink.reject(&rejection).await;

        assert_eq!(rx.recv().await, Some(ValidationOutcome::Valid(record)));
        assert_eq!(
            rx.recv().await.and_then(|o| o.reason().map(str::to_string)),
            Some("unrecognized topic".to_string())
        );
    }

    #[tokio::test]
    async fn test_channel_sink_tolerates_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ChannelSink::new(tx);

        sink.dispatch(TelemetryRecord::Average(AverageRecord {
            node_id: "n1".to_string(),
            aggregation_result: "1".to_string(),
        }))
        .await;
    }
}
