use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::due::DuePoller;
use crate::error::AppError;
use crate::job::{JobDefinition, JobStatus};
use crate::queue::{JobQueue, Origin};
use crate::retry::{RetryPolicy, RetryScheduler};
use crate::store::JobStore;
use crate::throttle::DomainRateLimiter;
use crate::traits::JobRunner;
use crate::worker::{TracingWorkerReporter, Worker, WorkerReporter};

/// Owns the queue, the worker pool, the rate limiter and the two pollers.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct Orchestrator<S: JobStore, R: JobRunner> {
    store: S,
    runner: R,
    config: OrchestratorConfig,
    queue: Arc<JobQueue>,
    limiter: Arc<DomainRateLimiter>,
    reporter: Arc<dyn WorkerReporter>,
    cancel_token: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl<S: JobStore, R: JobRunner> Orchestrator<S, R> {
    pub fn new(store: S, runner: R, config: OrchestratorConfig) -> Self {
        Self {
            queue: Arc::new(JobQueue::new(config.queue_capacity)),
            limiter: Arc::new(DomainRateLimiter::new(config.rate_limit_interval)),
            store,
            runner,
            config,
            reporter: Arc::new(TracingWorkerReporter),
            cancel_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn WorkerReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn limiter(&self) -> &DomainRateLimiter {
        &self.limiter
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.cancel_token.is_cancelled()
    }

    /// Spawn the workers and pollers and return without waiting on any job.
    ///
    /// Jobs a previous process left `queued` or `running` are re-enqueued
    /// first. A second call fails with `AlreadyStarted`, including after
    /// `stop`.
    pub async fn start(&self) -> Result<(), AppError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(AppError::AlreadyStarted);
        }

        tracing::info!(
            workers = self.config.workers,
            queue_capacity = self.queue.capacity(),
            rate_limit_ms = self.config.rate_limit_interval.as_millis() as u64,
            "Starting orchestrator"
        );

        self.recover_interrupted().await;

        for n in 0..self.config.workers {
            let worker = Worker::new(
                format!("worker-{n}"),
                self.store.clone(),
                self.runner.clone(),
                self.queue.clone(),
                self.limiter.clone(),
                self.reporter.clone(),
            );
            let token = self.cancel_token.clone();
            self.tracker.spawn(async move { worker.run(token).await });
        }

        let retry = RetryScheduler::new(
            self.store.clone(),
            self.queue.clone(),
            RetryPolicy::new(self.config.backoff_base),
            self.config.retry_poll_interval,
            self.config.poll_batch,
        );
        let token = self.cancel_token.clone();
        self.tracker.spawn(async move { retry.run(token).await });

        let due = DuePoller::new(
            self.store.clone(),
            self.queue.clone(),
            self.config.due_poll_interval,
            self.config.orphan_after,
            self.config.poll_batch,
        );
        let token = self.cancel_token.clone();
        self.tracker.spawn(async move { due.run(token).await });

        Ok(())
    }

    async fn recover_interrupted(&self) {
        let jobs = match self.store.recover_interrupted(self.queue.capacity()).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to recover interrupted jobs");
                return;
            }
        };

        let mut recovered = 0usize;
        for job in jobs {
            // Submitted before `start`; already waiting in memory.
            if self.queue.contains(job.id) {
                continue;
            }
            if self.queue.try_push(job, Origin::Scheduled).is_err() {
                break;
            }
            recovered += 1;
        }
        if recovered > 0 {
            tracing::info!(%recovered, "Re-enqueued interrupted jobs");
        }
    }

    /// Signal shutdown and wait for every in-flight job and poller to finish.
    ///
    /// Jobs still waiting in the queue stay `queued` in the store and are
    /// picked up again on the next start. Calling `stop` twice is harmless.
    pub async fn stop(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        tracing::info!(in_queue = self.queue.len(), "Stopping orchestrator");

        self.cancel_token.cancel();
        self.queue.close();
        self.tracker.close();
        self.tracker.wait().await;
        self.limiter.clear();

        tracing::info!("Orchestrator stopped");
    }

    /// Persist a job and enqueue it for immediate execution.
    ///
    /// Waits up to the configured submit timeout for queue space. On
    /// `QueueFull` the job is already stored as `queued`; the orphan sweep
    /// enqueues it later.
    pub async fn submit_job(&self, definition: JobDefinition) -> Result<Uuid, AppError> {
        if self.cancel_token.is_cancelled() {
            return Err(AppError::QueueClosed);
        }

        let job = definition.into_job(JobStatus::Queued, Utc::now())?;
        self.store.insert_job(&job).await?;
        let job_id = job.id;
        tracing::debug!(%job_id, url = %job.url, job_type = %job.job_type, "Job submitted");

        if let Err(e) = self
            .queue
            .push_timeout(job, Origin::Submitted, self.config.submit_timeout)
            .await
        {
            tracing::warn!(%job_id, error = %e, "Submitted job not enqueued");
            return Err(e);
        }
        Ok(job_id)
    }

    /// Persist a job as `scheduled` with `next_run = now`; the due-job poller
    /// enqueues it on its next tick.
    pub async fn schedule_job(&self, definition: JobDefinition) -> Result<Uuid, AppError> {
        let now = Utc::now();
        let mut job = definition.into_job(JobStatus::Scheduled, now)?;
        job.next_run = Some(now);
        self.store.insert_job(&job).await?;
        tracing::debug!(job_id = %job.id, schedule = ?job.schedule, "Job scheduled");
        Ok(job.id)
    }
}
