use harvest_core::error::AppError;
use harvest_core::job::{FetchOutcome, Job};
use harvest_core::selector::compile;

use crate::extract::extract_html;
use crate::http::HttpFetcher;

/// Plain HTTP fetch followed by selector extraction on the returned HTML.
#[derive(Clone)]
pub struct StaticStrategy {
    http: HttpFetcher,
}

impl StaticStrategy {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    pub async fn fetch(&self, job: &Job) -> Result<FetchOutcome, AppError> {
        let response = self.http.send(job, None).await?;
        let data = extract_html(&response.body, &compile(&job.selectors));
        tracing::debug!(
            job_id = %job.id,
            status = response.status,
            bytes = response.body.len(),
            fields = job.selectors.len(),
            "Static page fetched"
        );

        Ok(FetchOutcome {
            status_code: response.status,
            data,
            html: Some(response.body),
            screenshot: None,
        })
    }
}
