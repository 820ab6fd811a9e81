//! Batch lifecycle through the SQLite adapters and the worker
//!
//! Enqueue inside a batch scope, run jobs, and observe callbacks and cleanup.

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;

use tally_core::application::{EnqueueRequest, HandlerRegistry};
use tally_core::domain::{BatchEvent, JobId, JobState};
use tally_core::port::BatchStore;
use tally_core::AppError;

fn handlers(recorder: &RecordingCallback) -> HandlerRegistry {
    let mut handlers = HandlerRegistry::with_callbacks(recorder.registry());
    handlers.register("Work", FailWhenAsked);
    handlers
}

async fn enqueue_work(
    h: &Harness,
    batch: &tally_core::application::Batch,
    payloads: Vec<serde_json::Value>,
) -> Vec<JobId> {
    h.service
        .root_context()
        .with_jobs(batch, |ctx| async move {
            let mut ids = Vec::new();
            for payload in payloads {
                let req = EnqueueRequest::new("Work", QUEUE, payload).with_max_attempts(2);
                ids.push(ctx.enqueue(req).await?);
            }
            Ok(ids)
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_all_jobs_succeed_fires_both_events_and_cleans_up() {
    let h = harness().await;
    let recorder = RecordingCallback::default();
    let worker = h.worker(handlers(&recorder));

    let batch = h.service.create(None);
    batch.set_description("nightly import").await.unwrap();
    batch
        .on(BatchEvent::Complete, RECORDING_CALLBACK, json!({"step": "complete"}))
        .await
        .unwrap();
    batch
        .on(BatchEvent::Success, RECORDING_CALLBACK, json!({"step": "success"}))
        .await
        .unwrap();

    let job_ids = enqueue_work(&h, &batch, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]).await;
    assert_eq!(job_ids.len(), 3);

    let status = batch.status().await.unwrap();
    assert_eq!(status.total, 3);
    assert_eq!(status.pending, 3);
    assert_eq!(status.description.as_deref(), Some("nightly import"));
    assert!(status.created_at.is_some());

    // 3 work jobs + 2 callback jobs
    assert_eq!(drain(&worker).await, 5);

    let mut events = recorder.events_for(batch.bid());
    events.sort_by_key(|e| e.as_str());
    assert_eq!(events, vec![BatchEvent::Complete, BatchEvent::Success]);

    let fired = recorder.fired();
    let success = fired
        .iter()
        .find(|f| f.event == BatchEvent::Success)
        .unwrap();
    assert_eq!(success.options, json!({"step": "success"}));
    assert!(success.parent_bid.is_none());

    // Success removes every key of the batch
    assert!(matches!(batch.status().await, Err(AppError::NotFound(_))));
    for key in batch.bid().all_keys() {
        assert!(!h.store.exists(&key).await.unwrap(), "{} survived cleanup", key);
    }

    assert_eq!(h.queue.count_by_state(QUEUE, JobState::Done).await.unwrap(), 5);
    for id in &job_ids {
        let job = h.queue.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.bid.as_ref(), Some(batch.bid()));
    }
}

#[tokio::test]
async fn test_failed_job_fires_complete_only_and_keeps_record() {
    let h = harness().await;
    let recorder = RecordingCallback::default();
    let worker = h.worker(handlers(&recorder));

    let batch = h.service.create(None);
    batch
        .on(BatchEvent::Complete, RECORDING_CALLBACK, json!({}))
        .await
        .unwrap();
    batch
        .on(BatchEvent::Success, RECORDING_CALLBACK, json!({}))
        .await
        .unwrap();

    let job_ids = enqueue_work(&h, &batch, vec![json!({"fail": true}), json!({"n": 2})]).await;

    // failing job runs twice, the other once, then one complete callback
    assert_eq!(drain(&worker).await, 4);

    assert_eq!(recorder.events_for(batch.bid()), vec![BatchEvent::Complete]);

    let status = batch.status().await.unwrap();
    assert_eq!(status.total, 2);
    assert_eq!(status.pending, 0);
    assert_eq!(status.failures, 1);
    assert_eq!(status.failed_job_ids, vec![job_ids[0].as_str().to_string()]);
    assert!(status.complete_fired);
    assert!(!status.success_fired);

    let failed = h.queue.find_by_id(&job_ids[0]).await.unwrap().unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.attempts, 2);
}

#[tokio::test]
async fn test_retried_job_reports_once() {
    let h = harness().await;
    let recorder = RecordingCallback::default();

    /// Fails on the first attempt only
    struct FirstAttemptFails;

    #[async_trait::async_trait]
    impl tally_core::application::JobHandler for FirstAttemptFails {
        async fn perform(&self, ctx: &tally_core::application::JobContext) -> tally_core::Result<()> {
            if ctx.job().attempts < 2 {
                return Err(AppError::Handler("first attempt".to_string()));
            }
            Ok(())
        }
    }

    let mut registry = HandlerRegistry::with_callbacks(recorder.registry());
    registry.register("Work", FirstAttemptFails);
    let worker = h.worker(registry);

    let batch = h.service.create(None);
    batch
        .on(BatchEvent::Success, RECORDING_CALLBACK, json!({}))
        .await
        .unwrap();
    enqueue_work(&h, &batch, vec![json!({})]).await;

    // two attempts + success callback
    assert_eq!(drain(&worker).await, 3);
    assert_eq!(recorder.events_for(batch.bid()), vec![BatchEvent::Success]);
    assert!(matches!(batch.status().await, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_callbacks_run_on_configured_queue() {
    let h = harness().await;
    let recorder = RecordingCallback::default();
    let registry = Arc::new(handlers(&recorder));
    let default_worker = h.worker_on(QUEUE, registry.clone());
    let callback_worker = h.worker_on("callbacks", registry);

    let batch = h.service.create(None);
    batch.set_callback_queue("callbacks").await.unwrap();
    batch
        .on(BatchEvent::Complete, RECORDING_CALLBACK, json!({"a": 1}))
        .await
        .unwrap();
    enqueue_work(&h, &batch, vec![json!({})]).await;

    assert_eq!(drain(&default_worker).await, 1);
    assert!(recorder.fired().is_empty());
    assert_eq!(
        h.queue
            .count_by_state("callbacks", JobState::Queued)
            .await
            .unwrap(),
        1
    );

    assert_eq!(drain(&callback_worker).await, 1);
    assert_eq!(recorder.events_for(batch.bid()), vec![BatchEvent::Complete]);
}

#[tokio::test]
async fn test_batch_without_callbacks_still_cleans_up() {
    let h = harness().await;
    let recorder = RecordingCallback::default();
    let worker = h.worker(handlers(&recorder));

    let batch = h.service.create(None);
    enqueue_work(&h, &batch, vec![json!({}), json!({})]).await;

    assert_eq!(drain(&worker).await, 2);
    assert!(recorder.fired().is_empty());
    assert!(matches!(batch.status().await, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_enqueue_outside_scope_is_usage_error() {
    let h = harness().await;
    let result = h
        .service
        .root_context()
        .enqueue(EnqueueRequest::new("Work", QUEUE, json!({})))
        .await;
    assert!(matches!(result, Err(AppError::Usage(_))));
    assert_eq!(h.queue.count_by_state(QUEUE, JobState::Queued).await.unwrap(), 0);
}

#[tokio::test]
async fn test_plain_job_runs_without_batch() {
    let h = harness().await;
    let recorder = RecordingCallback::default();
    let worker = h.worker(handlers(&recorder));

    let job_id = h
        .service
        .submit(EnqueueRequest::new("Work", QUEUE, json!({})))
        .await
        .unwrap();
    assert_eq!(drain(&worker).await, 1);

    let job = h.queue.find_by_id(&job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Done);
    assert!(job.bid.is_none());
}

#[tokio::test]
async fn test_unregistered_job_type_counts_as_failure() {
    let h = harness().await;
    let recorder = RecordingCallback::default();
    let worker = h.worker(handlers(&recorder));

    let batch = h.service.create(None);
    let job_ids = h
        .service
        .root_context()
        .with_jobs(&batch, |ctx| async move {
            Ok(vec![
                ctx.enqueue(EnqueueRequest::new("Unknown", QUEUE, json!({})))
                    .await?,
            ])
        })
        .await
        .unwrap();

    assert_eq!(drain(&worker).await, 1);
    let status = batch.status().await.unwrap();
    assert_eq!(status.failed_job_ids, vec![job_ids[0].as_str().to_string()]);
    assert!(status.complete_fired);
}
