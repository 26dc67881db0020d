use harvest_core::error::AppError;
use harvest_core::job::{FetchOutcome, Job, JobType};
use harvest_core::traits::JobRunner;

use crate::api::ApiStrategy;
#[cfg(feature = "browser")]
use crate::browser::DynamicStrategy;
use crate::http::HttpFetcher;
use crate::static_page::StaticStrategy;

/// Dispatches each job to the strategy for its effective type.
///
/// Without the `browser` feature, dynamic jobs (including static jobs
/// flagged `javascript`) fail with `InvalidJob`.
#[derive(Clone)]
pub struct StrategyRunner {
    static_page: StaticStrategy,
    api: ApiStrategy,
    #[cfg(feature = "browser")]
    dynamic: DynamicStrategy,
}

impl StrategyRunner {
    pub fn new() -> Result<Self, AppError> {
        Self::build(true)
    }

    /// Build with SSRF protection disabled on every strategy.
    pub fn allow_private_urls() -> Result<Self, AppError> {
        Self::build(false)
    }

    fn build(ssrf_protection: bool) -> Result<Self, AppError> {
        let http = if ssrf_protection {
            HttpFetcher::new()?
        } else {
            HttpFetcher::allow_private_urls()?
        };

        #[cfg(feature = "browser")]
        let dynamic = if ssrf_protection {
            DynamicStrategy::new()
        } else {
            DynamicStrategy::new().allow_private_urls()
        };

        Ok(Self {
            static_page: StaticStrategy::new(http.clone()),
            api: ApiStrategy::new(http),
            #[cfg(feature = "browser")]
            dynamic,
        })
    }

    #[cfg(feature = "browser")]
    async fn dynamic(&self, job: &Job) -> Result<FetchOutcome, AppError> {
        self.dynamic.fetch(job).await
    }

    #[cfg(not(feature = "browser"))]
    async fn dynamic(&self, _job: &Job) -> Result<FetchOutcome, AppError> {
        Err(AppError::InvalidJob(
            "dynamic jobs need the `browser` feature".into(),
        ))
    }
}

impl JobRunner for StrategyRunner {
    async fn run(&self, job: &Job) -> Result<FetchOutcome, AppError> {
        match job.effective_type() {
            JobType::Static => self.static_page.fetch(job).await,
            JobType::Api => self.api.fetch(job).await,
            JobType::Dynamic => self.dynamic(job).await,
        }
    }
}
