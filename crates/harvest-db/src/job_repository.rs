use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use harvest_core::error::AppError;
use harvest_core::job::{Job, JobStatus, JobType};

/// PostgreSQL persistence for the `jobs` table.
///
/// Status changes made by pollers go through conditional updates
/// (`WHERE status = ...`) so a late poller never overwrites a worker.
#[derive(Clone)]
pub struct JobRepository {
    pool: Pool<Postgres>,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, job: &Job) -> Result<(), AppError> {
        let max_retries = i32::try_from(job.max_retries).map_err(|_| {
            AppError::InvalidJob(format!("max_retries {} out of range", job.max_retries))
        })?;
        let timeout_secs = i64::try_from(job.timeout_secs).map_err(|_| {
            AppError::InvalidJob(format!("timeout_secs {} out of range", job.timeout_secs))
        })?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, url, job_type, method, headers, payload, selectors, schedule,
                max_retries, timeout_seconds, user_agent, proxy_url, javascript, wait_for,
                status, retry_count, next_run, priority, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(job.id)
        .bind(&job.url)
        .bind(job.job_type.as_str())
        .bind(&job.method)
        .bind(Json(&job.headers))
        .bind(&job.payload)
        .bind(Json(&job.selectors))
        .bind(&job.schedule)
        .bind(max_retries)
        .bind(timeout_secs)
        .bind(&job.user_agent)
        .bind(&job.proxy_url)
        .bind(job.javascript)
        .bind(&job.wait_for)
        .bind(job.status.as_str())
        .bind(job.retry_count as i32)
        .bind(job.next_run)
        .bind(job.priority)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(r#"SELECT * FROM jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    pub async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, AppError> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, JobRow>(
                r#"
                SELECT * FROM jobs
                WHERE status = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, JobRow>(
                r#"
                SELECT * FROM jobs
                ORDER BY created_at DESC
                LIMIT $1
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM jobs WHERE status = $1"#)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    pub async fn mark_running(&self, job_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    pub async fn finish_run(
        &self,
        job_id: Uuid,
        status: JobStatus,
        retry_count: u32,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, retry_count = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(retry_count as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    pub async fn transition(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(job_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn claim_due(&self, job_id: Uuid, next_run: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', next_run = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'scheduled'
            "#,
        )
        .bind(job_id)
        .bind(next_run)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, AppError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE status = 'scheduled' AND next_run <= $1
            ORDER BY priority DESC, next_run ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn retry_candidates(&self, limit: usize) -> Result<Vec<Job>, AppError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE status = 'retry_pending' AND retry_count < max_retries
            ORDER BY updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn stale_queued(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE status = 'queued' AND updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Reset `running` rows left by a dead process and return every queued
    /// job, highest priority first.
    pub async fn recover_interrupted(&self, limit: usize) -> Result<Vec<Job>, AppError> {
        let reset = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', updated_at = NOW()
            WHERE status = 'running'
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        if reset.rows_affected() > 0 {
            tracing::warn!(reset = reset.rows_affected(), "Reset interrupted running jobs");
        }

        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE status = 'queued'
            ORDER BY priority DESC, created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    url: String,
    job_type: String,
    method: String,
    headers: Json<HashMap<String, String>>,
    payload: Option<serde_json::Value>,
    selectors: Json<BTreeMap<String, String>>,
    schedule: Option<String>,
    max_retries: i32,
    timeout_seconds: i64,
    user_agent: String,
    proxy_url: Option<String>,
    javascript: bool,
    wait_for: Option<String>,
    status: String,
    retry_count: i32,
    next_run: Option<DateTime<Utc>>,
    priority: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            url: row.url,
            job_type: row.job_type.parse().unwrap_or(JobType::Static),
            method: row.method,
            headers: row.headers.0,
            payload: row.payload,
            selectors: row.selectors.0,
            schedule: row.schedule,
            max_retries: row.max_retries.max(0) as u32,
            timeout_secs: row.timeout_seconds.max(0) as u64,
            user_agent: row.user_agent,
            proxy_url: row.proxy_url,
            javascript: row.javascript,
            wait_for: row.wait_for,
            status: row.status.parse().unwrap_or(JobStatus::Queued),
            retry_count: row.retry_count.max(0) as u32,
            next_run: row.next_run,
            priority: row.priority,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
