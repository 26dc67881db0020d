use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Job, JobStatus, ScrapeResult};

/// Durable record of jobs and their results.
///
/// The store is the only source of truth for job status. Writers never hold
/// locks across a read-decide-write sequence; conditional updates
/// ([`transition`](Self::transition), [`claim_due`](Self::claim_due)) keep a
/// poller from overwriting a worker's newer write.
pub trait JobStore: Send + Sync + Clone + 'static {
    /// Persist a new job exactly as given (id, status, timestamps).
    fn insert_job(&self, job: &Job) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get_job(&self, job_id: Uuid)
    -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    /// Newest first.
    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    fn count_by_status(
        &self,
        status: JobStatus,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    fn mark_running(&self, job_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Record the status and retry counter decided by a worker after a run.
    fn finish_run(
        &self,
        job_id: Uuid,
        status: JobStatus,
        retry_count: u32,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Set `to` only if the job is currently `from`; bumps `updated_at`.
    /// Returns whether a row changed.
    fn transition(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Move a scheduled job to queued and record its following run time.
    fn claim_due(
        &self,
        job_id: Uuid,
        next_run: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Scheduled jobs whose `next_run` is at or before `now`, highest
    /// priority first.
    fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    /// `retry_pending` jobs that still have retry budget, oldest update first.
    fn retry_candidates(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    /// `queued` jobs untouched since `cutoff`.
    fn stale_queued(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    /// Jobs a previous process left `queued` or `running`. `running` rows are
    /// reset to `queued`.
    fn recover_interrupted(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    /// Append a result row. Re-inserting the same result id is a no-op.
    fn save_result(
        &self,
        result: &ScrapeResult,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Results of one job, newest first.
    fn list_results(
        &self,
        job_id: Uuid,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ScrapeResult>, AppError>> + Send;
}
