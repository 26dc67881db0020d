use harvest_core::error::AppError;
use harvest_core::job::{FetchOutcome, Job};
use serde_json::Value;

use crate::http::HttpFetcher;

/// JSON API call. The payload, if any, goes out as the JSON request body.
#[derive(Clone)]
pub struct ApiStrategy {
    http: HttpFetcher,
}

impl ApiStrategy {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    pub async fn fetch(&self, job: &Job) -> Result<FetchOutcome, AppError> {
        let response = self.http.send(job, job.payload.as_ref()).await?;
        let data = parse_body(&response.body);
        tracing::debug!(
            job_id = %job.id,
            status = response.status,
            content_type = ?response.content_type,
            "API response received"
        );

        Ok(FetchOutcome {
            status_code: response.status,
            data,
            html: None,
            screenshot: None,
        })
    }
}

/// JSON when the body parses, otherwise the raw text as a JSON string.
pub fn parse_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}
