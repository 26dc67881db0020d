//! Test utilities: job fixtures and mock implementations of the core traits.
//!
//! Mocks use `Arc<Mutex<_>>` so tests can assert on recorded calls after
//! handing a clone to the orchestrator.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{FetchOutcome, Job, JobDefinition, JobStatus, JobType};
use crate::traits::JobRunner;
use crate::worker::{WorkerEvent, WorkerReporter};

/// A queued static job for `https://example.com`.
pub fn make_test_job() -> Job {
    make_job_for("https://example.com")
}

pub fn make_job_for(url: &str) -> Job {
    JobDefinition::new(url, JobType::Static)
        .into_job(JobStatus::Queued, Utc::now())
        .expect("fixture definition is valid")
}

pub fn ok_outcome(data: serde_json::Value) -> FetchOutcome {
    FetchOutcome {
        status_code: 200,
        data,
        html: None,
        screenshot: None,
    }
}

// ---------------------------------------------------------------------------
// MockRunner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunnerCall {
    pub job_id: Uuid,
    pub url: String,
    pub started: Instant,
}

#[derive(Clone, Copy)]
enum Fallback {
    Succeed,
    Fail,
}

/// Runner that replays scripted outcomes, then falls back to a fixed one.
#[derive(Clone)]
pub struct MockRunner {
    responses: Arc<Mutex<VecDeque<Result<FetchOutcome, AppError>>>>,
    fallback: Fallback,
    delay: Duration,
    calls: Arc<Mutex<Vec<RunnerCall>>>,
}

impl MockRunner {
    /// Always succeeds with `{"ok": true}`.
    pub fn succeeding() -> Self {
        Self::build(Vec::new(), Fallback::Succeed)
    }

    /// Always fails with a retryable network error.
    pub fn failing() -> Self {
        Self::build(Vec::new(), Fallback::Fail)
    }

    /// Pops one scripted response per call, succeeding once they run out.
    pub fn with_responses(responses: Vec<Result<FetchOutcome, AppError>>) -> Self {
        Self::build(responses, Fallback::Succeed)
    }

    fn build(responses: Vec<Result<FetchOutcome, AppError>>, fallback: Fallback) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            fallback,
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl JobRunner for MockRunner {
    async fn run(&self, job: &Job) -> Result<FetchOutcome, AppError> {
        self.calls.lock().unwrap().push(RunnerCall {
            job_id: job.id,
            url: job.url.clone(),
            started: Instant::now(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.responses.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None => match self.fallback {
                Fallback::Succeed => Ok(ok_outcome(serde_json::json!({"ok": true}))),
                Fallback::Fail => Err(AppError::NetworkError("connection refused".into())),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records a compact label for every worker event.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == label)
            .count()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match event {
            WorkerEvent::Started { .. } => "started",
            WorkerEvent::JobStarted { .. } => "job_started",
            WorkerEvent::JobCompleted { .. } => "job_completed",
            WorkerEvent::JobFailed { will_retry: true, .. } => "job_failed_retry",
            WorkerEvent::JobFailed { .. } => "job_failed",
            WorkerEvent::Stopped { .. } => "stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}
