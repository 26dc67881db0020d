pub mod config;
pub mod due;
pub mod error;
pub mod job;
pub mod memory_store;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod schedule;
pub mod selector;
pub mod store;
pub mod throttle;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub mod testutil;

pub use config::OrchestratorConfig;
pub use error::AppError;
pub use job::{FetchOutcome, Job, JobDefinition, JobStatus, JobType, ScrapeResult};
pub use memory_store::MemoryJobStore;
pub use orchestrator::Orchestrator;
pub use queue::{JobQueue, Origin};
pub use retry::RetryPolicy;
pub use selector::{ExtractAction, SelectorRule};
pub use store::JobStore;
pub use throttle::DomainRateLimiter;
pub use traits::JobRunner;
pub use worker::{TracingWorkerReporter, WorkerEvent, WorkerReporter};
