use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{FetchOutcome, Job, JobStatus, JobType, ScrapeResult};
use crate::queue::JobQueue;
use crate::store::JobStore;
use crate::throttle::DomainRateLimiter;
use crate::traits::JobRunner;

/// Events emitted by workers for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    JobStarted {
        worker_id: &'a str,
        job_id: Uuid,
        url: &'a str,
        job_type: JobType,
    },
    JobCompleted {
        job_id: Uuid,
        status_code: u16,
        duration_ms: u64,
    },
    JobFailed {
        job_id: Uuid,
        error: &'a str,
        will_retry: bool,
        retry_count: u32,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::debug!(%worker_id, "Worker started");
            }
            WorkerEvent::JobStarted {
                worker_id,
                job_id,
                url,
                job_type,
            } => {
                tracing::info!(%worker_id, %job_id, %url, %job_type, "Processing job");
            }
            WorkerEvent::JobCompleted {
                job_id,
                status_code,
                duration_ms,
            } => {
                tracing::info!(%job_id, %status_code, %duration_ms, "Job completed");
            }
            WorkerEvent::JobFailed {
                job_id,
                error,
                will_retry,
                retry_count,
            } => {
                tracing::warn!(%job_id, %error, %will_retry, %retry_count, "Job failed");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::debug!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// One member of the worker pool. Pulls jobs off the shared queue and runs
/// them to completion, one at a time.
pub struct Worker<S: JobStore, R: JobRunner> {
    id: String,
    store: S,
    runner: R,
    queue: Arc<JobQueue>,
    limiter: Arc<DomainRateLimiter>,
    reporter: Arc<dyn WorkerReporter>,
}

impl<S: JobStore, R: JobRunner> Worker<S, R> {
    pub fn new(
        id: impl Into<String>,
        store: S,
        runner: R,
        queue: Arc<JobQueue>,
        limiter: Arc<DomainRateLimiter>,
        reporter: Arc<dyn WorkerReporter>,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            runner,
            queue,
            limiter,
            reporter,
        }
    }

    /// Run until cancelled or the queue closes. A job already popped is
    /// always finished before returning.
    pub async fn run(&self, cancel_token: CancellationToken) {
        self.reporter.report(WorkerEvent::Started { worker_id: &self.id });

        loop {
            let job = tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                job = self.queue.pop() => job,
            };
            let Some(job) = job else { break };
            self.process_job(job).await;
        }

        self.reporter.report(WorkerEvent::Stopped { worker_id: &self.id });
    }

    /// Execute one job and persist its result and next status.
    ///
    /// The duration clock starts before rate-limit waiting, so reported
    /// durations include throttling.
    pub async fn process_job(&self, job: Job) -> ScrapeResult {
        let started = Instant::now();
        self.limiter.acquire(&job.url).await;

        if let Err(e) = self.store.mark_running(job.id).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to mark job running");
        }
        self.reporter.report(WorkerEvent::JobStarted {
            worker_id: &self.id,
            job_id: job.id,
            url: &job.url,
            job_type: job.effective_type(),
        });

        let outcome = self.execute(&job).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(outcome) => self.on_success(&job, outcome, duration_ms).await,
            Err(e) => self.on_failure(&job, &e, duration_ms).await,
        }
    }

    /// Run the strategy on its own task so a panic inside it surfaces as a
    /// failed attempt instead of killing the worker.
    async fn execute(&self, job: &Job) -> Result<FetchOutcome, AppError> {
        let runner = self.runner.clone();
        let owned = job.clone();
        tokio::spawn(async move { runner.run(&owned).await })
            .await
            .unwrap_or_else(|e| Err(AppError::Generic(format!("strategy task aborted: {e}"))))
    }

    async fn on_success(&self, job: &Job, outcome: FetchOutcome, duration_ms: u64) -> ScrapeResult {
        let result = ScrapeResult::success(job, outcome, duration_ms);
        self.persist_result(&result).await;

        let (status, retry_count) = if job.is_recurring() {
            (JobStatus::Scheduled, 0)
        } else {
            (JobStatus::Completed, job.retry_count)
        };
        if let Err(e) = self.store.finish_run(job.id, status, retry_count).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to mark job completed");
        }

        self.reporter.report(WorkerEvent::JobCompleted {
            job_id: job.id,
            status_code: result.status_code.unwrap_or_default(),
            duration_ms,
        });
        result
    }

    async fn on_failure(&self, job: &Job, error: &AppError, duration_ms: u64) -> ScrapeResult {
        let result = ScrapeResult::failure(job, error, duration_ms);
        self.persist_result(&result).await;

        let attempts = job.retry_count.saturating_add(1);
        let will_retry = error.is_retryable() && attempts < job.max_retries;
        let (status, retry_count) = if will_retry {
            (JobStatus::RetryPending, attempts)
        } else if job.is_recurring() {
            (JobStatus::Scheduled, 0)
        } else {
            (JobStatus::Failed, attempts)
        };

        let error_msg = error.to_string();
        self.reporter.report(WorkerEvent::JobFailed {
            job_id: job.id,
            error: &error_msg,
            will_retry,
            retry_count: attempts,
        });

        if let Err(e) = self.store.finish_run(job.id, status, retry_count).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to mark job as failed");
        }
        result
    }

    async fn persist_result(&self, result: &ScrapeResult) {
        if let Err(e) = self.store.save_result(result).await {
            tracing::error!(job_id = %result.job_id, error = %e, "Failed to save result");
        }
    }
}
