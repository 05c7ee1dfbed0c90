//! Ingest pipeline: validate every inbound message and dispatch it
//!
//! The pipeline drains the session's inbound channel. With one worker every
//! message is validated inline in arrival order. With more, messages are
//! sharded into lanes by topic, so ordering still holds within a topic while
//! different topics are validated concurrently.

use super::sink::DispatchSink;
use super::validator::{MessageValidator, RejectionKind, ValidationOutcome};
use crate::config::PipelineSection;
use crate::observability::metrics::metrics;
use crate::protocol::RawMessage;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Longest payload excerpt written to a rejection log line
const PAYLOAD_LOG_LIMIT: usize = 256;

/// Counters for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub valid: u64,
    pub rejected_unrecognized: u64,
    pub rejected_malformed: u64,
    pub rejected_schema: u64,
}

impl PipelineStats {
    pub fn rejected(&self) -> u64 {
        self.rejected_unrecognized + self.rejected_malformed + self.rejected_schema
    }

    pub fn merge(&mut self, other: &PipelineStats) {
        self.received += other.received;
        self.valid += other.valid;
        self.rejected_unrecognized += other.rejected_unrecognized;
        self.rejected_malformed += other.rejected_malformed;
        self.rejected_schema += other.rejected_schema;
    }

    fn record_rejection(&mut self, kind: RejectionKind) {
        match kind {
            RejectionKind::UnrecognizedTopic => self.rejected_unrecognized += 1,
            RejectionKind::MalformedPayload => self.rejected_malformed += 1,
            RejectionKind::SchemaMismatch => self.rejected_schema += 1,
        }
    }
}

/// Consumes raw messages until the inbound channel closes
pub struct IngestPipeline {
    sink: Arc<dyn DispatchSink>,
    workers: usize,
    lane_capacity: usize,
}

impl IngestPipeline {
    pub fn new(sink: Arc<dyn DispatchSink>) -> Self {
        Self {
            sink,
            workers: 1,
            lane_capacity: 64,
        }
    }

    pub fn from_config(sink: Arc<dyn DispatchSink>, config: &PipelineSection) -> Self {
        Self::new(sink).with_workers(config.workers, config.lane_capacity)
    }

    /// Zero is treated as one
    pub fn with_workers(mut self, workers: usize, lane_capacity: usize) -> Self {
        self.workers = workers.max(1);
        self.lane_capacity = lane_capacity.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run until every sender of `inbound` is dropped and all lanes drain
    pub async fn run(self, mut inbound: mpsc::Receiver<RawMessage>) -> PipelineStats {
        info!(workers = self.workers, "Ingest pipeline started");

        let stats = if self.workers == 1 {
            let mut stats = PipelineStats::default();
            while let Some(raw) = inbound.recv().await {
                ingest(self.sink.as_ref(), raw, &mut stats).await;
            }
            stats
        } else {
            self.run_sharded(inbound).await
        };

        info!(
            received = stats.received,
            valid = stats.valid,
            rejected = stats.rejected(),
            "Ingest pipeline stopped"
        );
        stats
    }

    async fn run_sharded(&self, mut inbound: mpsc::Receiver<RawMessage>) -> PipelineStats {
        let mut lanes = Vec::with_capacity(self.workers);
        let mut tasks: Vec<JoinHandle<PipelineStats>> = Vec::with_capacity(self.workers);

        for lane in 0..self.workers {
            let (tx, rx) = mpsc::channel(self.lane_capacity);
            let sink = self.sink.clone();
            tasks.push(tokio::spawn(run_lane(lane, sink, rx)));
            lanes.push(tx);
        }

        // Messages whose lane died are validated here instead
        let mut stats = PipelineStats::default();

        while let Some(raw) = inbound.recv().await {
            let lane = lane_for(&raw.topic, self.workers);
            if let Err(mpsc::error::SendError(raw)) = lanes[lane].send(raw).await {
                warn!(lane, "Pipeline lane closed, validating inline");
                ingest(self.sink.as_ref(), raw, &mut stats).await;
            }
        }

        drop(lanes);
        for (lane, task) in tasks.into_iter().enumerate() {
            match task.await {
                Ok(lane_stats) => stats.merge(&lane_stats),
                Err(e) => error!(lane, error = %e, "Pipeline lane failed"),
            }
        }
        stats
    }
}

async fn run_lane(
    lane: usize,
    sink: Arc<dyn DispatchSink>,
    mut rx: mpsc::Receiver<RawMessage>,
) -> PipelineStats {
    debug!(lane, "Pipeline lane started");
    let mut stats = PipelineStats::default();
    while let Some(raw) = rx.recv().await {
        ingest(sink.as_ref(), raw, &mut stats).await;
    }
    debug!(lane, received = stats.received, "Pipeline lane drained");
    stats
}

/// Same topic, same lane
fn lane_for(topic: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    topic.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

async fn ingest(sink: &dyn DispatchSink, raw: RawMessage, stats: &mut PipelineStats) {
    let span = crate::ingest_span!(topic = %raw.topic, bytes = raw.payload.len());
    stats.received += 1;
    metrics().message_received();

    match MessageValidator::validate(&raw) {
        ValidationOutcome::Valid(record) => {
            stats.valid += 1;
            metrics().message_valid();
            sink.dispatch(record).instrument(span).await;
        }
        ValidationOutcome::Rejected(rejection) => {
            stats.record_rejection(rejection.kind);
            metrics().message_rejected(rejection.kind);

            let payload = rejection.raw.payload_lossy();
            let excerpt: String = payload.chars().take(PAYLOAD_LOG_LIMIT).collect();
            span.in_scope(|| {
                warn!(
                    topic = %rejection.raw.topic,
                    kind = %rejection.kind,
                    reason = %rejection.reason,
                    payload = %excerpt,
                    "Rejected message"
                );
            });
            sink.reject(&rejection).instrument(span).await;
        }
    }
}
