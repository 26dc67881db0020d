//! Bounded in-memory job queue shared by the worker pool and the pollers.
//!
//! Capacity is enforced with a semaphore of free slots; consumers wait on a
//! second semaphore counting ready entries. Entries are ordered by job
//! priority, then by [`Origin`], then FIFO.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Semaphore, TryAcquireError};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::Job;

/// Why a job entered the queue. Higher ranks are served first among jobs of
/// equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Promoted by the due-job poller, or recovered after a restart.
    Scheduled,
    /// Fresh `submit_job` call.
    Submitted,
    /// Promoted by the retry scheduler.
    Retry,
}

impl Origin {
    fn rank(self) -> u8 {
        match self {
            Origin::Scheduled => 0,
            Origin::Submitted => 1,
            Origin::Retry => 2,
        }
    }
}

struct Entry {
    job: Job,
    origin: Origin,
    seq: u64,
}

impl Entry {
    fn key(&self) -> (i32, u8, std::cmp::Reverse<u64>) {
        (
            self.job.priority,
            self.origin.rank(),
            std::cmp::Reverse(self.seq),
        )
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

pub struct JobQueue {
    capacity: usize,
    heap: Mutex<BinaryHeap<Entry>>,
    free_slots: Semaphore,
    ready: Semaphore,
    seq: AtomicU64,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            heap: Mutex::new(BinaryHeap::with_capacity(capacity)),
            free_slots: Semaphore::new(capacity),
            ready: Semaphore::new(0),
            seq: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a job with this id is waiting in the queue.
    pub fn contains(&self, job_id: Uuid) -> bool {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|entry| entry.job.id == job_id)
    }

    pub fn is_closed(&self) -> bool {
        self.ready.is_closed()
    }

    /// Enqueue, waiting up to `wait` for a free slot.
    pub async fn push_timeout(
        &self,
        job: Job,
        origin: Origin,
        wait: Duration,
    ) -> Result<(), AppError> {
        let permit = tokio::time::timeout(wait, self.free_slots.acquire())
            .await
            .map_err(|_| AppError::QueueFull {
                waited_ms: wait.as_millis() as u64,
            })?
            .map_err(|_| AppError::QueueClosed)?;
        permit.forget();
        self.insert(job, origin);
        Ok(())
    }

    /// Enqueue without waiting. Fails with `QueueFull` when no slot is free.
    pub fn try_push(&self, job: Job, origin: Origin) -> Result<(), AppError> {
        match self.free_slots.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => return Err(AppError::QueueFull { waited_ms: 0 }),
            Err(TryAcquireError::Closed) => return Err(AppError::QueueClosed),
        }
        self.insert(job, origin);
        Ok(())
    }

    fn insert(&self, job: Job, origin: Origin) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry { job, origin, seq });
        self.ready.add_permits(1);
    }

    /// Wait for the next job. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<Job> {
        let permit = self.ready.acquire().await.ok()?;
        permit.forget();
        let entry = self
            .heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        self.free_slots.add_permits(1);
        entry.map(|e| e.job)
    }

    /// Stop accepting and handing out jobs. Waiting producers and consumers
    /// are released; entries still queued are dropped from memory but stay
    /// `queued` in the store.
    pub fn close(&self) {
        self.ready.close();
        self.free_slots.close();
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(100)
    }
}
