//! Shared wiring: SQLite adapters in memory or on a WAL file, one worker per call

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tally_core::application::retry::RetryPolicy;
use tally_core::application::{
    BatchCallback, BatchConfig, BatchService, CallbackContext, CallbackRegistry, HandlerRegistry,
    JobContext, JobHandler, Worker,
};
use tally_core::domain::{BatchEvent, BatchId};
use tally_core::port::id_provider::{RandomTokenProvider, UuidProvider};
use tally_core::port::time_provider::SystemTimeProvider;
use tally_core::port::TimeProvider;
use tally_core::{AppError, Result};
use tally_infra_sqlite::{create_pool, run_migrations, SqliteBatchStore, SqliteJobQueue};

pub const QUEUE: &str = "default";
pub const RECORDING_CALLBACK: &str = "Recording";

pub struct Harness {
    pub service: BatchService,
    pub store: Arc<SqliteBatchStore>,
    pub queue: Arc<SqliteJobQueue>,
    pub time_provider: Arc<dyn TimeProvider>,
}

/// Single-connection in-memory database
pub async fn harness() -> Harness {
    harness_at("sqlite::memory:").await
}

/// File database in WAL mode with a multi-connection pool
///
/// Leftovers from an earlier run are removed first; call
/// [`remove_db_files`] when done.
pub async fn file_harness(name: &str) -> (Harness, PathBuf) {
    let db_path =
        std::env::temp_dir().join(format!("tally_test_{}_{}.db", name, std::process::id()));
    remove_db_files(&db_path);
    let harness = harness_at(&db_path.to_string_lossy()).await;
    (harness, db_path)
}

pub fn remove_db_files(db_path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut path = db_path.as_os_str().to_owned();
        path.push(suffix);
        let _ = std::fs::remove_file(path);
    }
}

pub async fn harness_at(database_url: &str) -> Harness {
    let pool = create_pool(database_url).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = Arc::new(SqliteBatchStore::new(pool.clone(), time_provider.clone()));
    let queue = Arc::new(SqliteJobQueue::new(pool, time_provider.clone()));
    let service = BatchService::new(
        store.clone(),
        queue.clone(),
        Arc::new(UuidProvider),
        Arc::new(RandomTokenProvider),
        time_provider.clone(),
        BatchConfig::default(),
    );

    Harness {
        service,
        store,
        queue,
        time_provider,
    }
}

impl Harness {
    pub fn worker(&self, handlers: HandlerRegistry) -> Worker {
        self.worker_on(QUEUE, Arc::new(handlers))
    }

    /// Worker with no retry delay, so retried jobs are poppable immediately
    pub fn worker_on(&self, queue: &str, handlers: Arc<HandlerRegistry>) -> Worker {
        Worker::new(
            queue,
            self.queue.clone(),
            handlers,
            self.service.clone(),
            Arc::new(RetryPolicy::new(self.time_provider.clone(), 0)),
            self.time_provider.clone(),
        )
    }
}

/// Process jobs until the queue has nothing available; returns the count
pub async fn drain(worker: &Worker) -> usize {
    let mut processed = 0;
    while worker.process_next_job().await.unwrap() {
        processed += 1;
    }
    processed
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fired {
    pub event: BatchEvent,
    pub bid: BatchId,
    pub parent_bid: Option<BatchId>,
    pub options: Value,
}

/// Callback that records every invocation
#[derive(Clone, Default)]
pub struct RecordingCallback {
    pub fired: Arc<Mutex<Vec<Fired>>>,
}

impl RecordingCallback {
    pub fn fired(&self) -> Vec<Fired> {
        self.fired.lock().unwrap().clone()
    }

    pub fn events_for(&self, bid: &BatchId) -> Vec<BatchEvent> {
        self.fired()
            .into_iter()
            .filter(|f| &f.bid == bid)
            .map(|f| f.event)
            .collect()
    }

    pub fn registry(&self) -> CallbackRegistry {
        let mut callbacks = CallbackRegistry::new();
        let recorder = self.clone();
        callbacks.register(RECORDING_CALLBACK, move || recorder.clone());
        callbacks
    }

    fn record(&self, ctx: &CallbackContext) {
        self.fired.lock().unwrap().push(Fired {
            event: ctx.event,
            bid: ctx.bid.clone(),
            parent_bid: ctx.parent_bid.clone(),
            options: ctx.options.clone(),
        });
    }
}

#[async_trait]
impl BatchCallback for RecordingCallback {
    async fn on_complete(&self, ctx: &CallbackContext) -> Result<()> {
        self.record(ctx);
        Ok(())
    }

    async fn on_success(&self, ctx: &CallbackContext) -> Result<()> {
        self.record(ctx);
        Ok(())
    }
}

pub struct Succeed;

#[async_trait]
impl JobHandler for Succeed {
    async fn perform(&self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }
}

/// Fails when the payload carries `"fail": true`
pub struct FailWhenAsked;

#[async_trait]
impl JobHandler for FailWhenAsked {
    async fn perform(&self, ctx: &JobContext) -> Result<()> {
        if ctx.payload().get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(AppError::Handler("asked to fail".to_string()));
        }
        Ok(())
    }
}
