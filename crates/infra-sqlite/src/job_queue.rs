// SQLite JobTransport + JobQueue Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tally_core::domain::{BatchId, Job, JobId, JobPayload, JobState, JobType};
use tally_core::error::{AppError, Result};
use tally_core::port::{JobQueue, JobTransport, TimeProvider};
use tracing::debug;

const INSERT_JOB: &str = r#"
    INSERT INTO jobs (
        id, queue, job_type, payload, bid, state,
        attempts, max_attempts, backoff_factor,
        created_at, available_at, started_at, finished_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

pub struct SqliteJobQueue {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    pub async fn count_by_state(&self, queue: &str, state: JobState) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue = ? AND state = ?")
            .bind(queue)
            .bind(state.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    /// Every job stamped with `bid`, oldest first
    pub async fn find_by_batch(&self, bid: &BatchId) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> =
            sqlx::query_as("SELECT * FROM jobs WHERE bid = ? ORDER BY created_at ASC, id ASC")
                .bind(bid.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn save_state(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, attempts = ?, available_at = ?, started_at = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.state.to_string())
        .bind(job.attempts)
        .bind(job.available_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Job {} not found", job.id)));
        }
        Ok(())
    }
}

fn insert_query<'q>(
    job: &'q Job,
    queue: &'q str,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    sqlx::query(INSERT_JOB)
        .bind(&job.id)
        .bind(queue)
        .bind(job.job_type.as_str())
        .bind(job.payload.as_value().to_string())
        .bind(job.bid.as_ref().map(|b| b.as_str()))
        .bind(job.state.to_string())
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.backoff_factor)
        .bind(job.created_at)
        .bind(job.available_at)
        .bind(job.started_at)
        .bind(job.finished_at)
}

#[async_trait]
impl JobTransport for SqliteJobQueue {
    async fn submit(&self, job: &Job) -> Result<()> {
        insert_query(job, &job.queue)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        debug!(job_id = %job.id, queue = %job.queue, "Job inserted");
        Ok(())
    }

    async fn submit_bulk(&self, jobs: &[Job], queue: &str) -> Result<()> {
        // All or nothing
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for job in jobs {
            insert_query(job, queue)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(queue, count = jobs.len(), "Job bulk inserted");
        Ok(())
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn pop_next(&self, queue: &str) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();

        // Claim and count the attempt in one statement
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = ?, started_at = ?, attempts = attempts + 1
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ? AND state = ? AND available_at <= ?
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(JobState::Running.to_string())
        .bind(now)
        .bind(queue)
        .bind(JobState::Queued.to_string())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn mark_done(&self, job: &Job) -> Result<()> {
        self.save_state(job).await
    }

    async fn mark_failed(&self, job: &Job) -> Result<()> {
        self.save_state(job).await
    }

    async fn requeue(&self, job: &Job) -> Result<()> {
        self.save_state(job).await
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    queue: String,
    job_type: String,
    payload: String,
    bid: Option<String>,
    state: String,
    attempts: i32,
    max_attempts: i32,
    backoff_factor: f64,
    created_at: i64,
    available_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let payload: serde_json::Value = serde_json::from_str(&self.payload)?;
        let bid = self.bid.map(BatchId::new).transpose()?;

        Ok(Job {
            id: self.id,
            queue: self.queue,
            job_type: JobType::new(self.job_type),
            payload: JobPayload::new(payload),
            bid,
            state: self.state.parse()?,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            backoff_factor: self.backoff_factor,
            created_at: self.created_at,
            available_at: self.available_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}
