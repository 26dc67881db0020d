use std::future::Future;

use crate::error::AppError;
use crate::job::{FetchOutcome, Job};

/// Executes one attempt of a job: fetch and extract, nothing else.
///
/// Implementations must honour `job.timeout()` themselves; the worker pool
/// never cancels an attempt once it has started.
pub trait JobRunner: Send + Sync + Clone + 'static {
    fn run(&self, job: &Job) -> impl Future<Output = Result<FetchOutcome, AppError>> + Send;
}
