use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::AppError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Upper bounds accepted by [`JobDefinition::into_job`].
pub const MAX_RETRIES_LIMIT: u32 = 100;
pub const MAX_TIMEOUT_SECS: u64 = 86_400;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; Harvest/0.1)";

/// How a job's content is fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Plain HTTP request, HTML parsed with CSS selectors.
    #[default]
    Static,
    /// Rendered in a headless browser.
    Dynamic,
    /// JSON API call; the response body is stored as-is.
    Api,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Static => "static",
            JobType::Dynamic => "dynamic",
            JobType::Api => "api",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "static" => Ok(JobType::Static),
            "dynamic" => Ok(JobType::Dynamic),
            "api" => Ok(JobType::Api),
            _ => Err(format!("Unknown job type: {}", s)),
        }
    }
}

/// Status of a job in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    RetryPending,
    Scheduled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::RetryPending => "retry_pending",
            JobStatus::Scheduled => "scheduled",
        }
    }

    /// No automatic transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "retry_pending" => Ok(JobStatus::RetryPending),
            "scheduled" => Ok(JobStatus::Scheduled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// A persisted scrape job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub url: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub method: String,
    pub headers: HashMap<String, String>,
    /// Request body for API jobs.
    pub payload: Option<serde_json::Value>,
    /// Output field -> extraction expression, evaluated in key order.
    pub selectors: BTreeMap<String, String>,
    pub schedule: Option<String>,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub proxy_url: Option<String>,
    pub javascript: bool,
    pub wait_for: Option<String>,
    pub status: JobStatus,
    pub retry_count: u32,
    pub next_run: Option<DateTime<Utc>>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// The strategy that actually runs this job. Static jobs flagged
    /// `javascript` are rendered in the browser.
    pub fn effective_type(&self) -> JobType {
        match self.job_type {
            JobType::Static if self.javascript => JobType::Dynamic,
            other => other,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_recurring(&self) -> bool {
        self.schedule.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Job definition as submitted by callers. Everything except `url` is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobDefinition {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub url: String,
    #[serde(rename = "type", default)]
    pub job_type: JobType,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default, alias = "timeout")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub javascript: bool,
    #[serde(default)]
    pub wait_for: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

impl JobDefinition {
    pub fn new(url: impl Into<String>, job_type: JobType) -> Self {
        Self {
            url: url.into(),
            job_type,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_selector(mut self, field: impl Into<String>, expr: impl Into<String>) -> Self {
        self.selectors.insert(field.into(), expr.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_wait_for(mut self, selector: impl Into<String>) -> Self {
        self.wait_for = Some(selector.into());
        self
    }

    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Validate the definition and materialise a [`Job`] with the given
    /// initial status, filling in defaults.
    pub fn into_job(self, status: JobStatus, now: DateTime<Utc>) -> Result<Job, AppError> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| AppError::InvalidJob(format!("invalid url '{}': {e}", self.url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::InvalidJob(format!(
                "url scheme '{}' is not supported",
                parsed.scheme()
            )));
        }

        if let Some(payload) = &self.payload
            && !(payload.is_object() || payload.is_null())
        {
            return Err(AppError::InvalidJob("payload must be a JSON object".into()));
        }

        let method = match self.method.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => {
                if !m.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(AppError::InvalidJob(format!("invalid method '{m}'")));
                }
                m.to_ascii_uppercase()
            }
            _ if self.job_type == JobType::Api && self.payload.is_some() => "POST".to_string(),
            _ => "GET".to_string(),
        };

        let timeout_secs = match self.timeout_secs {
            Some(0) | None => DEFAULT_TIMEOUT_SECS,
            Some(secs) if secs > MAX_TIMEOUT_SECS => {
                return Err(AppError::InvalidJob(format!(
                    "timeout_secs {secs} exceeds {MAX_TIMEOUT_SECS}"
                )));
            }
            Some(secs) => secs,
        };

        let max_retries = self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        if max_retries > MAX_RETRIES_LIMIT {
            return Err(AppError::InvalidJob(format!(
                "max_retries {max_retries} exceeds {MAX_RETRIES_LIMIT}"
            )));
        }

        Ok(Job {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            url: self.url,
            job_type: self.job_type,
            method,
            headers: self.headers,
            payload: self.payload.filter(|p| !p.is_null()),
            selectors: self.selectors,
            schedule: self.schedule.filter(|s| !s.trim().is_empty()),
            max_retries,
            timeout_secs,
            user_agent: self
                .user_agent
                .filter(|ua| !ua.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            proxy_url: self.proxy_url.filter(|p| !p.trim().is_empty()),
            javascript: self.javascript,
            wait_for: self.wait_for.filter(|w| !w.trim().is_empty()),
            status,
            retry_count: 0,
            next_run: None,
            priority: self.priority,
            created_at: now,
            updated_at: now,
        })
    }
}

/// What a fetch strategy returns on success.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub status_code: u16,
    pub data: serde_json::Value,
    pub html: Option<String>,
    pub screenshot: Option<Vec<u8>>,
}

/// One persisted execution attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub url: String,
    pub status_code: Option<u16>,
    pub data: serde_json::Value,
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub screenshot: Option<Vec<u8>>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub scraped_at: DateTime<Utc>,
}

impl ScrapeResult {
    pub fn success(job: &Job, outcome: FetchOutcome, duration_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            url: job.url.clone(),
            status_code: Some(outcome.status_code),
            data: outcome.data,
            html: outcome.html,
            screenshot: outcome.screenshot,
            error: None,
            duration_ms,
            scraped_at: Utc::now(),
        }
    }

    pub fn failure(job: &Job, error: &AppError, duration_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            url: job.url.clone(),
            status_code: error.status_code(),
            data: serde_json::Value::Null,
            html: None,
            screenshot: None,
            error: Some(error.to_string()),
            duration_ms,
            scraped_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
