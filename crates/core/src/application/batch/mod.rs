// Batch Service - handles, record lifecycle and engine entry points

mod config;
mod context;
mod counting;
mod dispatcher;
pub mod enqueue;

pub use config::{BatchConfig, DEFAULT_CALLBACK_QUEUE, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CHAIN_DEPTH};
pub use context::BatchContext;
pub use counting::{JobOutcome, ReportOutcome};
pub use dispatcher::DispatchOutcome;
pub use enqueue::EnqueueRequest;

use crate::domain::{field, BatchEvent, BatchId, BatchStatus, CallbackDescriptor, Job, JobId};
use crate::error::{AppError, Result};
use crate::port::id_provider::{RandomTokenProvider, UuidProvider};
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{BatchIdProvider, BatchStore, IdProvider, JobTransport, TimeProvider};
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point of the batch engine
///
/// Cheap to clone: every collaborator sits behind an `Arc`. All batch state
/// lives in the store, so services in different processes can operate on the
/// same batches concurrently.
#[derive(Clone)]
pub struct BatchService {
    store: Arc<dyn BatchStore>,
    transport: Arc<dyn JobTransport>,
    id_provider: Arc<dyn IdProvider>,
    bid_provider: Arc<dyn BatchIdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    config: Arc<BatchConfig>,
}

impl BatchService {
    pub fn new(
        store: Arc<dyn BatchStore>,
        transport: Arc<dyn JobTransport>,
        id_provider: Arc<dyn IdProvider>,
        bid_provider: Arc<dyn BatchIdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: BatchConfig,
    ) -> Self {
        Self {
            store,
            transport,
            id_provider,
            bid_provider,
            time_provider,
            config: Arc::new(config),
        }
    }

    /// Production providers (UUID job ids, random batch tokens, system clock)
    pub fn with_defaults(store: Arc<dyn BatchStore>, transport: Arc<dyn JobTransport>) -> Self {
        Self::new(
            store,
            transport,
            Arc::new(UuidProvider),
            Arc::new(RandomTokenProvider),
            Arc::new(SystemTimeProvider),
            BatchConfig::default(),
        )
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Handle for a new batch, or for an existing one when `bid` is given
    ///
    /// Nothing is written: a record with no fields reads as
    /// pending=0, total=0, valid.
    pub fn create(&self, bid: Option<BatchId>) -> Batch {
        let bid = bid.unwrap_or_else(|| self.bid_provider.generate_bid());
        Batch {
            bid,
            service: self.clone(),
        }
    }

    /// Context with no active batch
    pub fn root_context(&self) -> BatchContext {
        BatchContext::root(self.clone())
    }

    /// Context whose innermost frame is `bid` (used by job handlers that only
    /// know their own batch id)
    pub fn context_for(&self, bid: &BatchId) -> BatchContext {
        BatchContext::root(self.clone()).push(self.create(Some(bid.clone())))
    }

    /// Enqueue a job that belongs to no batch
    pub async fn submit(&self, req: EnqueueRequest) -> Result<JobId> {
        let job = self.build_job(req)?;
        self.transport.submit(&job).await?;
        debug!(job_id = %job.id, queue = %job.queue, "Job submitted");
        Ok(job.id)
    }

    pub(crate) fn build_job(&self, req: EnqueueRequest) -> Result<Job> {
        enqueue::build_job(self.id_provider.as_ref(), self.time_provider.as_ref(), req)
    }

    pub(crate) fn now_millis(&self) -> i64 {
        self.time_provider.now_millis()
    }

    /// Refresh the retention TTL of a key, when one is configured
    pub(crate) async fn touch(&self, key: &str) -> Result<()> {
        if let Some(ttl) = self.config.record_ttl {
            self.store.expire(key, ttl).await?;
        }
        Ok(())
    }

    /// Sticky invalid flag of one batch (ancestors not consulted)
    pub async fn is_invalid(&self, bid: &BatchId) -> Result<bool> {
        let flag = self.store.hash_get(&bid.record_key(), field::INVALID).await?;
        Ok(matches!(flag.as_deref(), Some("true") | Some("1")))
    }

    /// Stored parent pointer of one batch
    pub async fn parent_of(&self, bid: &BatchId) -> Result<Option<BatchId>> {
        let parent = self
            .store
            .hash_get(&bid.record_key(), field::PARENT_BID)
            .await?;
        Ok(parent.map(BatchId::new).transpose()?)
    }

    /// Registered callbacks for an event, newest registration first
    pub async fn registered_callbacks(
        &self,
        bid: &BatchId,
        event: BatchEvent,
    ) -> Result<Vec<CallbackDescriptor>> {
        self.store
            .list_range(&bid.callbacks_key(event))
            .await?
            .iter()
            .map(|raw| serde_json::from_str::<CallbackDescriptor>(raw).map_err(AppError::from))
            .collect()
    }
}

/// Handle on one batch record
#[derive(Clone)]
pub struct Batch {
    bid: BatchId,
    service: BatchService,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch").field("bid", &self.bid).finish()
    }
}

impl PartialEq for Batch {
    fn eq(&self, other: &Self) -> bool {
        self.bid == other.bid
    }
}

impl Batch {
    pub fn bid(&self) -> &BatchId {
        &self.bid
    }

    pub async fn set_description(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        let key = self.bid.record_key();
        self.service
            .store
            .hash_set(&key, field::DESCRIPTION, &text)
            .await?;
        self.service.touch(&key).await
    }

    /// Stored description; `NotFound` once the record is gone
    pub async fn description(&self) -> Result<Option<String>> {
        let fields = self.service.store.hash_get_all(&self.bid.record_key()).await?;
        if fields.is_empty() {
            return Err(self.not_found());
        }
        Ok(fields.get(field::DESCRIPTION).cloned())
    }

    pub async fn set_callback_queue(&self, queue: impl Into<String>) -> Result<()> {
        let queue = queue.into();
        enqueue::validate_queue_name(&queue)?;
        let key = self.bid.record_key();
        self.service
            .store
            .hash_set(&key, field::CALLBACK_QUEUE, &queue)
            .await?;
        self.service.touch(&key).await
    }

    /// Effective callback queue (configured default when unset)
    pub async fn callback_queue(&self) -> Result<String> {
        let queue = self
            .service
            .store
            .hash_get(&self.bid.record_key(), field::CALLBACK_QUEUE)
            .await?;
        Ok(queue.unwrap_or_else(|| self.service.config.default_callback_queue.clone()))
    }

    /// Register a callback for `event`; the latest registration is dispatched first
    pub async fn on(
        &self,
        event: BatchEvent,
        callback_type: impl Into<String>,
        options: serde_json::Value,
    ) -> Result<()> {
        let descriptor = CallbackDescriptor::new(callback_type, options);
        if descriptor.callback_type.trim().is_empty() {
            return Err(AppError::Validation(
                "Callback type cannot be empty".to_string(),
            ));
        }

        let key = self.bid.callbacks_key(event);
        let encoded = serde_json::to_string(&descriptor)?;
        self.service.store.list_push_front(&key, &encoded).await?;
        self.service.touch(&key).await?;

        debug!(
            bid = %self.bid,
            event = %event,
            callback_type = %descriptor.callback_type,
            "Batch callback registered"
        );
        Ok(())
    }

    /// Registered callbacks for `event`, in dispatch order
    pub async fn callbacks(&self, event: BatchEvent) -> Result<Vec<CallbackDescriptor>> {
        self.service.registered_callbacks(&self.bid, event).await
    }

    /// Mark this batch invalid. Never undone; descendants observe it through
    /// their ancestor chain.
    pub async fn invalidate_all(&self) -> Result<()> {
        let key = self.bid.record_key();
        self.service.store.hash_set(&key, field::INVALID, "true").await?;
        self.service.touch(&key).await?;
        info!(bid = %self.bid, "Batch invalidated");
        Ok(())
    }

    pub async fn is_invalidated(&self) -> Result<bool> {
        self.service.is_invalid(&self.bid).await
    }

    pub async fn parent_bid(&self) -> Result<Option<BatchId>> {
        self.service.parent_of(&self.bid).await
    }

    /// Snapshot of counters, flags and failures; `NotFound` once cleaned up
    pub async fn status(&self) -> Result<BatchStatus> {
        let fields = self.service.store.hash_get_all(&self.bid.record_key()).await?;
        if fields.is_empty() {
            return Err(self.not_found());
        }
        let failed = self.service.store.set_members(&self.bid.failed_key()).await?;
        Ok(BatchStatus::from_fields(self.bid.clone(), &fields, failed)?)
    }

    fn not_found(&self) -> AppError {
        AppError::NotFound(format!("batch record {}", self.bid.record_key()))
    }
}
