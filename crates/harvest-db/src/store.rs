use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use harvest_core::error::AppError;
use harvest_core::job::{Job, JobStatus, ScrapeResult};
use harvest_core::store::JobStore;

use crate::job_repository::JobRepository;
use crate::result_repository::ResultRepository;

/// PostgreSQL-backed [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
    jobs: JobRepository,
    results: ResultRepository,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            jobs: JobRepository::new(pool.clone()),
            results: ResultRepository::new(pool),
        }
    }
}

impl JobStore for PgJobStore {
    async fn insert_job(&self, job: &Job) -> Result<(), AppError> {
        self.jobs.insert(job).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        self.jobs.get(job_id).await
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        self.jobs.list(status, limit).await
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        self.jobs.count_by_status(status).await
    }

    async fn mark_running(&self, job_id: Uuid) -> Result<(), AppError> {
        self.jobs.mark_running(job_id).await
    }

    async fn finish_run(
        &self,
        job_id: Uuid,
        status: JobStatus,
        retry_count: u32,
    ) -> Result<(), AppError> {
        self.jobs.finish_run(job_id, status, retry_count).await
    }

    async fn transition(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, AppError> {
        self.jobs.transition(job_id, from, to).await
    }

    async fn claim_due(&self, job_id: Uuid, next_run: DateTime<Utc>) -> Result<bool, AppError> {
        self.jobs.claim_due(job_id, next_run).await
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, AppError> {
        self.jobs.due(now, limit).await
    }

    async fn retry_candidates(&self, limit: usize) -> Result<Vec<Job>, AppError> {
        self.jobs.retry_candidates(limit).await
    }

    async fn stale_queued(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        self.jobs.stale_queued(cutoff, limit).await
    }

    async fn recover_interrupted(&self, limit: usize) -> Result<Vec<Job>, AppError> {
        self.jobs.recover_interrupted(limit).await
    }

    async fn save_result(&self, result: &ScrapeResult) -> Result<(), AppError> {
        self.results.save(result).await
    }

    async fn list_results(
        &self,
        job_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ScrapeResult>, AppError> {
        self.results.list_for_job(job_id, limit).await
    }
}
