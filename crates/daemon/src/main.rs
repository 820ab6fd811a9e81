//! Tally worker daemon
//!
//! Pops jobs from the SQLite queue, runs registered handlers, and reports each
//! terminal outcome to the job's batch.

mod callbacks;
mod config;
mod logging;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use config::WorkerConfig;
use tally_core::application::retry::RetryPolicy;
use tally_core::application::{shutdown_channel, BatchService, HandlerRegistry, Worker};
use tally_core::port::id_provider::{RandomTokenProvider, UuidProvider};
use tally_core::port::time_provider::SystemTimeProvider;
use tally_core::port::{BatchStore, TimeProvider};
use tally_infra_redis::RedisBatchStore;
use tally_infra_sqlite::{create_pool, run_migrations, SqliteBatchStore, SqliteJobQueue};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::from_env().context("Invalid configuration")?;
    logging::init(config.log_format)?;

    info!("Tally worker v{} starting...", VERSION);

    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Cannot create {}", parent.display()))?;
        }
    }

    info!(db_path = %config.db_path, "Initializing database...");
    let pool = create_pool(&config.database_url())
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);

    let store: Arc<dyn BatchStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisBatchStore::connect(url)
                .await
                .map_err(|e| anyhow::anyhow!("Redis connection failed: {}", e))?,
        ),
        None => {
            let store = SqliteBatchStore::new(pool.clone(), time_provider.clone());
            match store.purge_expired().await {
                Ok(purged) => info!(purged_keys = purged, "Expired batch keys purged"),
                Err(e) => error!(error = ?e, "Expired batch key purge failed"),
            }
            Arc::new(store)
        }
    };

    let job_queue = Arc::new(SqliteJobQueue::new(pool.clone(), time_provider.clone()));

    let service = BatchService::new(
        store,
        job_queue.clone(),
        Arc::new(UuidProvider),
        Arc::new(RandomTokenProvider),
        time_provider.clone(),
        config.batch.clone(),
    );

    // Application handlers are registered here by embedding binaries;
    // the stock daemon runs batch callbacks only.
    let handlers = Arc::new(HandlerRegistry::with_callbacks(callbacks::builtin_callbacks()));
    let retry_policy = Arc::new(RetryPolicy::new(
        time_provider.clone(),
        config.retry_base_delay_ms,
    ));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut worker_handles = Vec::with_capacity(config.queues.len());

    for queue in &config.queues {
        let worker = Worker::new(
            queue.clone(),
            job_queue.clone(),
            handlers.clone(),
            service.clone(),
            retry_policy.clone(),
            time_provider.clone(),
        );
        let shutdown = shutdown_rx.clone();
        info!(queue = %queue, "Starting worker...");
        worker_handles.push(tokio::spawn(async move {
            if let Err(e) = worker.run(shutdown).await {
                error!(queue = %worker.queue(), error = ?e, "Worker failed");
            }
        }));
    }

    info!(
        queues = ?config.queues,
        job_types = ?handlers.job_types(),
        "System ready. Waiting for jobs..."
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    shutdown_tx.shutdown();
    let join_all = futures::future::join_all(worker_handles);
    if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, join_all).await.is_err() {
        error!("Workers did not stop within the grace period");
    }
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}
