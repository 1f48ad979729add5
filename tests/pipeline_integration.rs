//! End-to-end tests for the ingestion pipeline.
//!
//! Drives a [`Pipeline`] against a [`MemorySink`] and checks the observable
//! behavior a producer relies on:
//! - Replayed batches return the earlier result without touching the sink
//! - Only changed records reach the sink
//! - Transient sink failures are retried with backoff
//! - An open breaker stops calls until its reset timeout passes

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use feedgate::queue::{JobEvent, QueueConfig};
use feedgate::resilience::BreakerConfig;
use feedgate::{
    CircuitState, DedupConfig, FeedgateConfig, JobOptions, JobPayload, JobStatus, MemorySink,
    Pipeline, Priority, Submission,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn incidents(severities: &[u8]) -> Vec<Value> {
    severities
        .iter()
        .enumerate()
        .map(|(i, severity)| {
            json!({
                "id": format!("inc-{i}"),
                "severity": severity,
                "lastChecked": format!("2026-10-19T10:0{i}:00Z"),
            })
        })
        .collect()
}

fn pipeline_with(config: FeedgateConfig) -> (Pipeline, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::new(config, sink.clone()).unwrap();
    (pipeline, sink)
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test]
async fn test_replayed_batch_returns_prior_result() {
    let (pipeline, sink) = pipeline_with(FeedgateConfig::default());
    let batch = incidents(&[1, 2, 3]);

    let first = pipeline
        .submit_batch("camera-feed", batch.clone(), JobOptions::default())
        .unwrap();
    let Submission::Enqueued { hash, .. } = first else {
        panic!("first submission should enqueue");
    };
    let outcome = pipeline.process_next().await.unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);
    let calls = sink.call_count();

    // Reordered and with new volatile timestamps, the batch is the same content.
    let mut replay: Vec<Value> = batch.into_iter().rev().collect();
    for record in &mut replay {
        record["lastChecked"] = json!("2026-10-19T11:00:00Z");
    }
    let second = pipeline
        .submit_batch("camera-feed", replay, JobOptions::default())
        .unwrap();

    match second {
        Submission::Duplicate {
            hash: replay_hash,
            result,
            ..
        } => {
            assert_eq!(replay_hash, hash);
            assert_eq!(result.unwrap(), outcome.result.unwrap());
        },
        other => panic!("expected duplicate, got {other:?}"),
    }
    assert_eq!(sink.call_count(), calls);
    assert!(pipeline.queued_jobs().is_empty());
}

#[tokio::test]
async fn test_only_changed_records_reach_sink() {
    let (pipeline, sink) = pipeline_with(FeedgateConfig::default());

    pipeline
        .submit_batch("camera-feed", incidents(&[1, 1, 1, 1, 1]), JobOptions::default())
        .unwrap();
    pipeline.process_next().await.unwrap();
    assert_eq!(sink.written_count(), 5);

    pipeline
        .submit_batch("camera-feed", incidents(&[1, 4, 1, 5, 1]), JobOptions::default())
        .unwrap();
    let outcome = pipeline.process_next().await.unwrap();

    let result = outcome.result.unwrap();
    assert_eq!(result["total"], 5);
    assert_eq!(result["written"], 2);
    assert_eq!(result["skipped"], 3);
    assert_eq!(sink.written_count(), 7);
}

#[tokio::test]
async fn test_disabled_dedup_writes_everything() {
    let config = FeedgateConfig::default().with_dedup(DedupConfig::default().with_enabled(false));
    let (pipeline, sink) = pipeline_with(config);

    for _ in 0..2 {
        let submission = pipeline
            .submit_batch("camera-feed", incidents(&[2, 2]), JobOptions::default())
            .unwrap();
        assert!(!submission.is_duplicate());
        pipeline.process_next().await.unwrap();
    }
    assert_eq!(sink.written_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_replay_window_expires() {
    let config = FeedgateConfig::default()
        .with_dedup(DedupConfig::default().with_bulk_ttl(Duration::from_secs(60)));
    let (pipeline, _sink) = pipeline_with(config);
    let batch = incidents(&[3]);

    pipeline
        .submit_batch("sensor-feed", batch.clone(), JobOptions::default())
        .unwrap();
    pipeline.process_next().await.unwrap();
    assert!(
        pipeline
            .submit_batch("sensor-feed", batch.clone(), JobOptions::default())
            .unwrap()
            .is_duplicate()
    );

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(
        !pipeline
            .submit_batch("sensor-feed", batch, JobOptions::default())
            .unwrap()
            .is_duplicate()
    );
}

// ============================================================================
// Queue behavior
// ============================================================================

#[tokio::test]
async fn test_priority_order_then_fifo() {
    let (pipeline, _sink) = pipeline_with(FeedgateConfig::default());
    let cleanup = |priority| {
        pipeline.enqueue(
            JobPayload::CacheCleanup {
                cache_type: "aggregates".to_string(),
            },
            JobOptions::new().with_priority(priority),
        )
    };

    let low = cleanup(Priority::Low);
    let normal_a = cleanup(Priority::Normal);
    let high = cleanup(Priority::High);
    let normal_b = cleanup(Priority::Normal);

    let mut order = Vec::new();
    while let Some(outcome) = pipeline.process_next().await {
        order.push(outcome.id);
    }
    assert_eq!(order, vec![high, normal_a, normal_b, low]);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let config =
        FeedgateConfig::default().with_queue(QueueConfig::default().with_retries(3, 100));
    let (pipeline, sink) = pipeline_with(config);
    let handle = pipeline.start();

    sink.fail_next(2);
    pipeline
        .submit_batch("camera-feed", incidents(&[1, 2]), JobOptions::default())
        .unwrap();
    assert!(pipeline.wait_idle(Duration::from_secs(60)).await);

    let stats = pipeline.queue_stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(sink.call_count(), 3);
    assert_eq!(sink.written_count(), 2);

    handle.stop().await;
}

#[tokio::test]
async fn test_invalid_payload_fails_without_retry() {
    let (pipeline, sink) = pipeline_with(FeedgateConfig::default());

    pipeline
        .enqueue_raw("status-batch", json!({"statusUpdates": []}), JobOptions::default())
        .unwrap();
    let outcome = pipeline.process_next().await.unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(sink.call_count(), 0);
    assert_eq!(pipeline.queue_stats().recent_failures.len(), 1);
}

#[tokio::test]
async fn test_status_batch_applies_updates() {
    let (pipeline, sink) = pipeline_with(FeedgateConfig::default());

    pipeline
        .enqueue_raw(
            "status-batch",
            json!({"statusUpdates": [
                {"id": "cam-7", "status": "offline"},
                {"id": "cam-9", "status": "online"},
            ]}),
            JobOptions::new().with_priority(Priority::High),
        )
        .unwrap();
    let outcome = pipeline.process_next().await.unwrap();

    assert_eq!(outcome.result.unwrap()["applied"], 2);
    assert_eq!(sink.status_of("cam-7").as_deref(), Some("offline"));
}

#[tokio::test]
async fn test_lifecycle_events_in_order() {
    let (pipeline, _sink) = pipeline_with(FeedgateConfig::default());
    let mut events = pipeline.subscribe();

    let Submission::Enqueued { job_id, .. } = pipeline
        .submit_batch("camera-feed", incidents(&[1]), JobOptions::default())
        .unwrap()
    else {
        panic!("expected enqueue");
    };
    pipeline.process_next().await.unwrap();

    let kinds: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| e.job_id() == Some(job_id))
        .map(|e| e.event_type())
        .collect();
    assert_eq!(kinds, vec!["enqueued", "started", "completed"]);
}

#[tokio::test]
async fn test_clear_queue_reports_event() {
    let (pipeline, _sink) = pipeline_with(FeedgateConfig::default());
    let mut events = pipeline.subscribe();

    for _ in 0..3 {
        pipeline.enqueue(
            JobPayload::DataSync {
                sync_type: "summary".to_string(),
            },
            JobOptions::default(),
        );
    }
    assert_eq!(pipeline.clear_queue(), 3);
    assert!(pipeline.queue_stats().is_idle());

    let cleared = std::iter::from_fn(|| events.try_recv().ok())
        .find(|e| matches!(e, JobEvent::Cleared { .. }))
        .unwrap();
    assert_eq!(cleared, JobEvent::Cleared { count: 3 });
}

// ============================================================================
// Circuit breaking
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_open_breaker_stops_sink_calls_until_timeout() {
    let config = FeedgateConfig::default()
        .with_breakers(vec![BreakerConfig::new("database", 2, 30_000)]);
    let (pipeline, sink) = pipeline_with(config);
    let sync = || {
        pipeline.enqueue(
            JobPayload::DataSync {
                sync_type: "incident-summary".to_string(),
            },
            JobOptions::new().with_max_retries(1),
        )
    };

    sink.set_unavailable(true);
    for _ in 0..3 {
        sync();
        let outcome = pipeline.process_next().await.unwrap();
        assert_eq!(outcome.status, JobStatus::Failed);
    }
    assert_eq!(sink.call_count(), 2);
    assert_eq!(pipeline.breaker_state("database").unwrap(), CircuitState::Open);
    let last = pipeline.queue_stats().recent_failures.pop().unwrap();
    assert!(last.error.contains("open"), "{}", last.error);

    sink.set_unavailable(false);
    tokio::time::advance(Duration::from_secs(31)).await;
    sync();
    let outcome = pipeline.process_next().await.unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(pipeline.breaker_state("database").unwrap(), CircuitState::Closed);
    let cached = pipeline
        .cache()
        .get("aggregates", "incident-summary")
        .unwrap()
        .unwrap();
    assert_eq!(cached["syncType"], "incident-summary");
}
