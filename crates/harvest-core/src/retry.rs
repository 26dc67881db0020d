//! Promotes failed jobs back into the queue once their backoff window has
//! elapsed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::MIN_POLL_INTERVAL;
use crate::error::AppError;
use crate::job::{Job, JobStatus};
use crate::queue::{JobQueue, Origin};
use crate::store::JobStore;

/// Exponent cap so `2^n` never overflows the delay.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Exponential backoff keyed off the attempt counter.
///
/// Delay for a job that has failed `n` times is `base * 2^n`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32 << retry_count.min(MAX_BACKOFF_EXPONENT);
        self.base.saturating_mul(factor)
    }

    /// Earliest time the job may run again.
    pub fn eligible_at(&self, job: &Job) -> DateTime<Utc> {
        let delay = TimeDelta::from_std(self.delay_for(job.retry_count)).unwrap_or(TimeDelta::MAX);
        job.updated_at
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_due(&self, job: &Job, now: DateTime<Utc>) -> bool {
        job.status == JobStatus::RetryPending
            && job.retry_count < job.max_retries
            && self.eligible_at(job) <= now
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Periodic task re-enqueueing `retry_pending` jobs.
pub struct RetryScheduler<S: JobStore> {
    store: S,
    queue: Arc<JobQueue>,
    policy: RetryPolicy,
    interval: Duration,
    batch: usize,
}

impl<S: JobStore> RetryScheduler<S> {
    pub fn new(
        store: S,
        queue: Arc<JobQueue>,
        policy: RetryPolicy,
        interval: Duration,
        batch: usize,
    ) -> Self {
        Self {
            store,
            queue,
            policy,
            interval: interval.max(MIN_POLL_INTERVAL),
            batch,
        }
    }

    /// Poll until cancelled.
    pub async fn run(&self, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = cancel_token.cancelled() => break,
            }

            match self.tick(Utc::now()).await {
                Ok(0) => {}
                Ok(promoted) => tracing::info!(%promoted, "Re-enqueued jobs for retry"),
                Err(e) => tracing::error!(error = %e, "Retry scan failed"),
            }
        }
        tracing::debug!("Retry scheduler stopped");
    }

    /// One scan. Returns how many jobs were enqueued.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let candidates = self.store.retry_candidates(self.batch).await?;
        let mut promoted = 0;

        for job in candidates {
            if !self.policy.is_due(&job, now) {
                continue;
            }
            let job_id = job.id;
            let retry_count = job.retry_count;
            match self.queue.try_push(job, Origin::Retry) {
                Ok(()) => {
                    // Conditional: a worker may already have picked it up.
                    self.store
                        .transition(job_id, JobStatus::RetryPending, JobStatus::Queued)
                        .await?;
                    tracing::debug!(%job_id, %retry_count, "Retry enqueued");
                    promoted += 1;
                }
                Err(AppError::QueueFull { .. }) => {
                    tracing::debug!("Queue full, deferring remaining retries");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(promoted)
    }
}
