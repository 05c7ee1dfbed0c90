//! Ingest pipeline behavior: ordering, accounting and sink delivery

use edge_ingest::processing::{ChannelSink, IngestPipeline, PipelineStats, ValidationOutcome};
use edge_ingest::protocol::{RawMessage, TelemetryRecord};
use edge_ingest::testing::mocks::RecordingSink;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

fn average(seq: usize) -> RawMessage {
    let body = json!({"node_id": "n1", "aggregation_result": seq.to_string()});
    RawMessage::new("/average", body.to_string().into_bytes())
}

fn energy(seq: usize) -> RawMessage {
    let body = json!({
        "node_id": "n2",
        "energy_optimal": seq.to_string(),
        "energy_original": "0",
        "details": "ok"
    });
    RawMessage::new("/energy", body.to_string().into_bytes())
}

async fn run_with(pipeline: IngestPipeline, messages: Vec<RawMessage>) -> PipelineStats {
    let (tx, rx) = mpsc::channel(8);
    let feeder = tokio::spawn(async move {
        for message in messages {
            if tx.send(message).await.is_err() {
                break;
            }
        }
    });
    let stats = pipeline.run(rx).await;
    feeder.await.unwrap();
    stats
}

fn sequence_of(record: &TelemetryRecord) -> usize {
    match record {
        TelemetryRecord::Average(r) => r.aggregation_result.parse().unwrap(),
        TelemetryRecord::Energy(r) => r.energy_optimal.parse().unwrap(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sharded_pipeline_preserves_per_topic_order() {
    let sink = Arc::new(RecordingSink::new());
    let pipeline = IngestPipeline::new(sink.clone()).with_workers(4, 2);

    let mut messages = Vec::new();
    for seq in 0..200 {
        messages.push(average(seq));
        messages.push(energy(seq));
    }

    let stats = run_with(pipeline, messages).await;
    assert_eq!(stats.received, 400);
    assert_eq!(stats.valid, 400);

    let records = sink.records();
    for topic in ["/average", "/energy"] {
        let sequence: Vec<usize> = records
            .iter()
            .filter(|r| r.topic() == topic)
            .map(sequence_of)
            .collect();
        assert_eq!(sequence, (0..200).collect::<Vec<_>>(), "order broken for {topic}");
    }
}

#[tokio::test]
async fn test_every_message_is_accounted_for() {
    let sink = Arc::new(RecordingSink::new());
    let pipeline = IngestPipeline::new(sink.clone()).with_workers(3, 4);

    let messages = vec![
        average(1),
        RawMessage::new("/average", "{\"node_id\":\"n1\"}"),
        RawMessage::new("/energy", "garbage"),
        RawMessage::new("/status", "{}"),
        energy(2),
        RawMessage::new("/energy", "[]"),
    ];

    let stats = run_with(pipeline, messages).await;

    assert_eq!(stats.received, 6);
    assert_eq!(stats.received, stats.valid + stats.rejected());
    assert_eq!(stats.valid, 2);
    assert_eq!(stats.rejected_schema, 1);
    assert_eq!(stats.rejected_malformed, 2);
    assert_eq!(stats.rejected_unrecognized, 1);
    assert_eq!(sink.records().len(), 2);
    assert_eq!(sink.rejections().len(), 4);
}

#[tokio::test]
async fn test_channel_sink_sees_outcomes_in_arrival_order() {
    let (outcome_tx, mut outcome_rx) = mpsc::channel(16);
    let pipeline = IngestPipeline::new(Arc::new(ChannelSink::new(outcome_tx)));

    let stats = run_with(
        pipeline,
        vec![average(1), RawMessage::new("/nowhere", "{}"), average(2)],
    )
    .await;
    assert_eq!(stats.received, 3);

    let mut outcomes = Vec::new();
    while let Ok(outcome) = outcome_rx.try_recv() {
        outcomes.push(outcome);
    }
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_valid());
    assert!(matches!(outcomes[1], ValidationOutcome::Rejected(_)));
    assert!(outcomes[2].is_valid());
}

#[tokio::test]
async fn test_empty_input_yields_empty_stats() {
    let pipeline = IngestPipeline::new(Arc::new(RecordingSink::new())).with_workers(2, 1);
    let stats = run_with(pipeline, Vec::new()).await;
    assert_eq!(stats, PipelineStats::default());
}
