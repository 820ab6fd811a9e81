// Callback Dispatcher
//
// Exactly-once per (batch, event): the fired flag is a test-and-set on the
// record hash. A failed submission clears the flag again and the reporter
// restores the pending count, so the job's rerun report retries the dispatch.

use super::{BatchService, EnqueueRequest};
use crate::domain::{field, BatchEvent, BatchId, CallbackInvocation, Job, CALLBACK_JOB_TYPE};
use crate::error::Result;
use tracing::{debug, error, info};

/// Result of one dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Flag was already set by an earlier dispatch
    AlreadyFired,
    /// This call won the flag and submitted `callbacks` invocation jobs
    Dispatched { callbacks: usize },
}

impl BatchService {
    /// Fire `event` for `bid` at most once
    ///
    /// Registered callbacks are submitted as one bulk on the batch's callback
    /// queue, newest registration first. Firing `Success` deletes every key of
    /// the batch afterwards, whether or not callbacks were registered.
    pub async fn enqueue_callbacks(
        &self,
        event: BatchEvent,
        bid: &BatchId,
    ) -> Result<DispatchOutcome> {
        let key = bid.record_key();
        let won = self.store.hash_set_nx(&key, event.as_str(), "true").await?;
        if !won {
            debug!(bid = %bid, event = %event, "Batch event already fired");
            return Ok(DispatchOutcome::AlreadyFired);
        }

        let callbacks = match self.submit_callbacks(event, bid).await {
            Ok(count) => count,
            Err(e) => {
                error!(bid = %bid, event = %event, error = %e, "Callback dispatch failed");
                self.store.hash_delete(&key, event.as_str()).await?;
                return Err(e);
            }
        };

        info!(bid = %bid, event = %event, callbacks, "Batch event fired");

        if event == BatchEvent::Success {
            self.cleanup(bid).await?;
        }

        Ok(DispatchOutcome::Dispatched { callbacks })
    }

    async fn submit_callbacks(&self, event: BatchEvent, bid: &BatchId) -> Result<usize> {
        let descriptors = self.registered_callbacks(bid, event).await?;
        if descriptors.is_empty() {
            return Ok(0);
        }

        let fields = self.store.hash_get_all(&bid.record_key()).await?;
        let queue = fields
            .get(field::CALLBACK_QUEUE)
            .cloned()
            .unwrap_or_else(|| self.config.default_callback_queue.clone());
        let parent_bid = fields
            .get(field::PARENT_BID)
            .map(|p| BatchId::new(p.as_str()))
            .transpose()?;

        let jobs = descriptors
            .into_iter()
            .map(|descriptor| {
                let invocation = CallbackInvocation {
                    callback_type: descriptor.callback_type,
                    event,
                    options: descriptor.options,
                    bid: bid.clone(),
                    parent_bid: parent_bid.clone(),
                };
                self.build_job(EnqueueRequest::new(
                    CALLBACK_JOB_TYPE,
                    queue.as_str(),
                    serde_json::to_value(&invocation)?,
                ))
            })
            .collect::<Result<Vec<Job>>>()?;

        self.transport.submit_bulk(&jobs, &queue).await?;
        Ok(jobs.len())
    }

    /// Delete the record, failed set and callback lists of `bid`
    pub async fn cleanup(&self, bid: &BatchId) -> Result<()> {
        let removed = self.store.delete(&bid.all_keys()).await?;
        debug!(bid = %bid, removed, "Batch keys deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::service;
    use super::*;
    use crate::error::AppError;
    use crate::port::BatchStore;
    use serde_json::json;

    fn invocation(job: &Job) -> CallbackInvocation {
        serde_json::from_value(job.payload.as_value().clone()).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_sets_flag_and_fires_once() {
        let (service, store, transport) = service();
        let batch = service.create(None);
        batch
            .on(BatchEvent::Complete, "SampleCallback", json!({}))
            .await
            .unwrap();

        let first = service
            .enqueue_callbacks(BatchEvent::Complete, batch.bid())
            .await
            .unwrap();
        let second = service
            .enqueue_callbacks(BatchEvent::Complete, batch.bid())
            .await
            .unwrap();

        assert_eq!(first, DispatchOutcome::Dispatched { callbacks: 1 });
        assert_eq!(second, DispatchOutcome::AlreadyFired);
        assert_eq!(transport.bulk_submissions().len(), 1);
        let flag = store
            .hash_get(&batch.bid().record_key(), "complete")
            .await
            .unwrap();
        assert_eq!(flag.as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_bulk_holds_newest_registration_first() {
        let (service, _, transport) = service();
        let batch = service.create(Some(BatchId::new("BID").unwrap()));
        batch
            .on(BatchEvent::Complete, "SampleCallback", json!({"a": "b"}))
            .await
            .unwrap();
        batch
            .on(BatchEvent::Complete, "SampleCallback2", json!({"b": "a"}))
            .await
            .unwrap();

        service
            .enqueue_callbacks(BatchEvent::Complete, batch.bid())
            .await
            .unwrap();

        let bulks = transport.bulk_submissions();
        assert_eq!(bulks.len(), 1);
        let (queue, jobs) = &bulks[0];
        assert_eq!(queue, "default");
        assert!(jobs.iter().all(|j| &j.queue == queue));

        let invocations: Vec<CallbackInvocation> = jobs.iter().map(invocation).collect();
        assert_eq!(invocations[0].callback_type, "SampleCallback2");
        assert_eq!(invocations[0].options, json!({"b": "a"}));
        assert_eq!(invocations[1].callback_type, "SampleCallback");
        assert_eq!(invocations[1].options, json!({"a": "b"}));
        assert!(invocations
            .iter()
            .all(|i| i.event == BatchEvent::Complete && i.bid.as_str() == "BID" && i.parent_bid.is_none()));
    }

    #[tokio::test]
    async fn test_bulk_uses_callback_queue_and_parent() {
        let (service, store, transport) = service();
        let batch = service.create(None);
        batch.set_callback_queue("callbacks").await.unwrap();
        store
            .hash_set(&batch.bid().record_key(), "parent_bid", "outer")
            .await
            .unwrap();
        batch.on(BatchEvent::Success, "Notify", json!(null)).await.unwrap();

        service
            .enqueue_callbacks(BatchEvent::Success, batch.bid())
            .await
            .unwrap();

        let bulks = transport.bulk_submissions();
        assert_eq!(bulks[0].0, "callbacks");
        let sent = invocation(&bulks[0].1[0]);
        assert_eq!(sent.parent_bid, Some(BatchId::new("outer").unwrap()));
        assert_eq!(sent.options, json!({}));
    }

    #[tokio::test]
    async fn test_success_without_callbacks_still_cleans_up() {
        let (service, store, transport) = service();
        let batch = service.create(None);
        batch.set_description("X").await.unwrap();

        let outcome = service
            .enqueue_callbacks(BatchEvent::Success, batch.bid())
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Dispatched { callbacks: 0 });
        assert!(transport.submissions().is_empty());
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_complete_keeps_record() {
        let (service, store, _) = service();
        let batch = service.create(None);
        batch.set_description("X").await.unwrap();

        service
            .enqueue_callbacks(BatchEvent::Complete, batch.bid())
            .await
            .unwrap();
        assert!(store.exists(&batch.bid().record_key()).await.unwrap());
        assert_eq!(batch.description().await.unwrap().as_deref(), Some("X"));
    }

    #[tokio::test]
    async fn test_failed_submission_clears_flag_for_retry() {
        let (service, store, transport) = service();
        let batch = service.create(None);
        batch.on(BatchEvent::Complete, "Notify", json!({})).await.unwrap();

        transport.set_unavailable(true);
        let err = service
            .enqueue_callbacks(BatchEvent::Complete, batch.bid())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
        assert!(store
            .hash_get(&batch.bid().record_key(), "complete")
            .await
            .unwrap()
            .is_none());

        transport.set_unavailable(false);
        let retried = service
            .enqueue_callbacks(BatchEvent::Complete, batch.bid())
            .await
            .unwrap();
        assert_eq!(retried, DispatchOutcome::Dispatched { callbacks: 1 });
    }
}
