use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Job, JobStatus, ScrapeResult};
use crate::store::JobStore;

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    results: Vec<ScrapeResult>,
}

/// [`JobStore`] kept in process memory. Used by the one-shot CLI command and
/// by tests; nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every stored result, in insertion order.
    pub fn all_results(&self) -> Vec<ScrapeResult> {
        self.lock().results.clone()
    }

    /// Overwrite a stored job, e.g. to age its `updated_at` in tests.
    pub fn put_job(&self, job: Job) {
        self.lock().jobs.insert(job.id, job);
    }

    fn sorted(mut jobs: Vec<Job>, limit: usize) -> Vec<Job> {
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        jobs
    }
}

impl JobStore for MemoryJobStore {
    async fn insert_job(&self, job: &Job) -> Result<(), AppError> {
        let mut inner = self.lock();
        if inner.jobs.contains_key(&job.id) {
            return Err(AppError::DatabaseError(format!(
                "job {} already exists",
                job.id
            )));
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        Ok(self.lock().jobs.get(&job_id).cloned())
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        let jobs = self
            .lock()
            .jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        Ok(Self::sorted(jobs, limit))
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|j| j.status == status)
            .count() as i64)
    }

    async fn mark_running(&self, job_id: Uuid) -> Result<(), AppError> {
        if let Some(job) = self.lock().jobs.get_mut(&job_id) {
            job.status = JobStatus::Running;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn finish_run(
        &self,
        job_id: Uuid,
        status: JobStatus,
        retry_count: u32,
    ) -> Result<(), AppError> {
        if let Some(job) = self.lock().jobs.get_mut(&job_id) {
            job.status = status;
            job.retry_count = retry_count;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn transition(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, AppError> {
        match self.lock().jobs.get_mut(&job_id) {
            Some(job) if job.status == from => {
                job.status = to;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_due(&self, job_id: Uuid, next_run: DateTime<Utc>) -> Result<bool, AppError> {
        match self.lock().jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Scheduled => {
                job.status = JobStatus::Queued;
                job.next_run = Some(next_run);
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, AppError> {
        let mut jobs: Vec<Job> = self
            .lock()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Scheduled && j.next_run.is_some_and(|t| t <= now))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.next_run.cmp(&b.next_run)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn retry_candidates(&self, limit: usize) -> Result<Vec<Job>, AppError> {
        let mut jobs: Vec<Job> = self
            .lock()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::RetryPending && j.retry_count < j.max_retries)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.updated_at);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn stale_queued(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        let mut jobs: Vec<Job> = self
            .lock()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued && j.updated_at < cutoff)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.updated_at);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn recover_interrupted(&self, limit: usize) -> Result<Vec<Job>, AppError> {
        let mut inner = self.lock();
        let now = Utc::now();
        let mut jobs = Vec::new();
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Queued;
                job.updated_at = now;
            }
            if job.status == JobStatus::Queued {
                jobs.push(job.clone());
            }
        }
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn save_result(&self, result: &ScrapeResult) -> Result<(), AppError> {
        let mut inner = self.lock();
        if !inner.results.iter().any(|r| r.id == result.id) {
            inner.results.push(result.clone());
        }
        Ok(())
    }

    async fn list_results(&self, job_id: Uuid, limit: usize) -> Result<Vec<ScrapeResult>, AppError> {
        let mut results: Vec<ScrapeResult> = self
            .lock()
            .results
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        results.reverse();
        results.truncate(limit);
        Ok(results)
    }
}
