//! Periodic promotion of scheduled jobs whose `next_run` has passed, plus a
//! sweep for queued jobs that never made it into the in-memory queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::MIN_POLL_INTERVAL;
use crate::error::AppError;
use crate::job::JobStatus;
use crate::queue::{JobQueue, Origin};
use crate::schedule::{DEFAULT_INTERVAL, parse_schedule};
use crate::store::JobStore;

/// Counts from one poller tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DueTick {
    pub promoted: usize,
    pub requeued: usize,
}

pub struct DuePoller<S: JobStore> {
    store: S,
    queue: Arc<JobQueue>,
    interval: Duration,
    orphan_after: Duration,
    batch: usize,
}

impl<S: JobStore> DuePoller<S> {
    pub fn new(
        store: S,
        queue: Arc<JobQueue>,
        interval: Duration,
        orphan_after: Duration,
        batch: usize,
    ) -> Self {
        Self {
            store,
            queue,
            interval: interval.max(MIN_POLL_INTERVAL),
            orphan_after,
            batch,
        }
    }

    pub async fn run(&self, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = cancel_token.cancelled() => break,
            }

            match self.tick(Utc::now()).await {
                Ok(DueTick { promoted: 0, requeued: 0 }) => {}
                Ok(DueTick { promoted, requeued }) => {
                    tracing::info!(%promoted, %requeued, "Enqueued due jobs");
                }
                Err(e) => tracing::error!(error = %e, "Due-job scan failed"),
            }
        }
        tracing::debug!("Due-job poller stopped");
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<DueTick, AppError> {
        let mut counts = DueTick::default();

        for job in self.store.due_jobs(now, self.batch).await? {
            let job_id = job.id;
            let next_run = next_run_after(job.schedule.as_deref(), now);
            match self.queue.try_push(job, Origin::Scheduled) {
                Ok(()) => {
                    if self.store.claim_due(job_id, next_run).await? {
                        counts.promoted += 1;
                    }
                }
                Err(AppError::QueueFull { .. }) => {
                    tracing::debug!("Queue full, leaving remaining due jobs scheduled");
                    return Ok(counts);
                }
                Err(e) => return Err(e),
            }
        }

        let cutoff = now - TimeDelta::from_std(self.orphan_after).unwrap_or(TimeDelta::MAX);
        for job in self.store.stale_queued(cutoff, self.batch).await? {
            let job_id = job.id;
            match self.queue.try_push(job, Origin::Scheduled) {
                Ok(()) => {
                    // Touch updated_at so the next sweep skips it.
                    self.store
                        .transition(job_id, JobStatus::Queued, JobStatus::Queued)
                        .await?;
                    tracing::warn!(%job_id, "Re-enqueued orphaned job");
                    counts.requeued += 1;
                }
                Err(AppError::QueueFull { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(counts)
    }
}

/// When a schedule fires next, counted from `now`.
pub fn next_run_after(schedule: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let interval = schedule.map_or(DEFAULT_INTERVAL, parse_schedule);
    let delta = TimeDelta::from_std(interval).unwrap_or(TimeDelta::hours(1));
    now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobDefinition, JobType};
    use crate::memory_store::MemoryJobStore;
    use crate::testutil::make_test_job;

    fn scheduled(schedule: &str, next_run: DateTime<Utc>) -> Job {
        let mut job = JobDefinition::new("https://example.com/feed", JobType::Static)
            .with_schedule(schedule)
            .into_job(JobStatus::Scheduled, Utc::now())
            .unwrap();
        job.next_run = Some(next_run);
        job
    }

    fn poller(store: &MemoryJobStore, queue: &Arc<JobQueue>) -> DuePoller<MemoryJobStore> {
        DuePoller::new(
            store.clone(),
            queue.clone(),
            Duration::from_secs(60),
            Duration::from_secs(600),
            100,
        )
    }

    #[test]
    fn next_run_uses_parsed_interval() {
        let now = Utc::now();
        assert_eq!(next_run_after(Some("5m"), now), now + TimeDelta::minutes(5));
        assert_eq!(next_run_after(Some("*/15 * * * *"), now), now + TimeDelta::minutes(15));
        assert_eq!(next_run_after(Some("whenever"), now), now + TimeDelta::hours(1));
        assert_eq!(next_run_after(None, now), now + TimeDelta::hours(1));
    }

    #[tokio::test]
    async fn promotes_due_and_skips_future() {
        let store = MemoryJobStore::new();
        let queue = Arc::new(JobQueue::new(10));
        let now = Utc::now();
        let due = scheduled("10m", now - TimeDelta::seconds(1));
        let later = scheduled("10m", now + TimeDelta::minutes(5));
        store.insert_job(&due).await.unwrap();
        store.insert_job(&later).await.unwrap();

        let counts = poller(&store, &queue).tick(now).await.unwrap();

        assert_eq!(counts, DueTick { promoted: 1, requeued: 0 });
        assert_eq!(queue.pop().await.unwrap().id, due.id);
        let after = store.get_job(due.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Queued);
        assert_eq!(after.next_run, Some(now + TimeDelta::minutes(10)));
        let untouched = store.get_job(later.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::Scheduled);
    }

    #[tokio::test]
    async fn full_queue_leaves_job_scheduled() {
        let store = MemoryJobStore::new();
        let queue = Arc::new(JobQueue::new(1));
        queue.try_push(make_test_job(), Origin::Submitted).unwrap();
        let now = Utc::now();
        let due = scheduled("1h", now - TimeDelta::minutes(1));
        store.insert_job(&due).await.unwrap();

        let counts = poller(&store, &queue).tick(now).await.unwrap();

        assert_eq!(counts, DueTick::default());
        let after = store.get_job(due.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Scheduled);
    }

    #[tokio::test]
    async fn stale_queued_job_is_requeued_once() {
        let store = MemoryJobStore::new();
        let queue = Arc::new(JobQueue::new(10));
        let mut orphan = make_test_job();
        orphan.updated_at = Utc::now() - TimeDelta::hours(1);
        store.insert_job(&orphan).await.unwrap();
        let fresh = make_test_job();
        store.insert_job(&fresh).await.unwrap();
        let p = poller(&store, &queue);

        let first = p.tick(Utc::now()).await.unwrap();
        assert_eq!(first.requeued, 1);
        assert_eq!(queue.pop().await.unwrap().id, orphan.id);

        let second = p.tick(Utc::now()).await.unwrap();
        assert_eq!(second.requeued, 0);
    }

    #[tokio::test]
    async fn overflowing_schedule_does_not_stall_other_jobs() {
        let store = MemoryJobStore::new();
        let queue = Arc::new(JobQueue::new(10));
        let now = Utc::now();
        let bad = scheduled(
            "10000000000000000000s10000000000000000000s",
            now - TimeDelta::seconds(2),
        );
        let good = scheduled("5m", now - TimeDelta::seconds(1));
        store.insert_job(&bad).await.unwrap();
        store.insert_job(&good).await.unwrap();

        let counts = poller(&store, &queue).tick(now).await.unwrap();

        assert_eq!(counts.promoted, 2);
        let bad_after = store.get_job(bad.id).await.unwrap().unwrap();
        assert_eq!(bad_after.next_run, Some(now + TimeDelta::hours(1)));
        let good_after = store.get_job(good.id).await.unwrap().unwrap();
        assert_eq!(good_after.next_run, Some(now + TimeDelta::minutes(5)));
    }
}
