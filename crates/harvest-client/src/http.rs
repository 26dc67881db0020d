use std::error::Error as StdError;
use std::fmt;
use std::net::IpAddr;

use harvest_core::error::AppError;
use harvest_core::job::Job;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::redirect::{Attempt, Policy};
use reqwest::{Client, ClientBuilder, Method, Proxy};
use url::{Host, Url};

use crate::ssrf::{is_private_ip, validate_url};

const MAX_REDIRECTS: usize = 10;

/// A fetched response body and its status.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Shared reqwest plumbing for the static and API strategies.
///
/// One pooled client serves every job without a proxy; jobs that carry a
/// `proxy_url` get a short-lived client of their own. By default, SSRF
/// protection is enabled, covering the job URL and every redirect hop; use
/// [`allow_private_urls`](Self::allow_private_urls) where the operator
/// controls every URL.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    ssrf_protection: bool,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::build(true)
    }

    /// Build with SSRF protection disabled, allowing requests and redirects
    /// to private/reserved IPs.
    pub fn allow_private_urls() -> Result<Self, AppError> {
        Self::build(false)
    }

    fn build(ssrf_protection: bool) -> Result<Self, AppError> {
        Ok(Self {
            client: client_builder(ssrf_protection)
                .build()
                .map_err(|e| AppError::HttpError(e.to_string()))?,
            ssrf_protection,
        })
    }

    fn client_for(&self, job: &Job) -> Result<Client, AppError> {
        let Some(proxy_url) = job.proxy_url.as_deref() else {
            return Ok(self.client.clone());
        };
        let proxy = Proxy::all(proxy_url)
            .map_err(|e| AppError::InvalidJob(format!("Invalid proxy '{proxy_url}': {e}")))?;
        client_builder(self.ssrf_protection)
            .proxy(proxy)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))
    }

    /// Send the job's request. `json_body`, when given, is serialized as the
    /// request body with `Content-Type: application/json`.
    pub async fn send(
        &self,
        job: &Job,
        json_body: Option<&serde_json::Value>,
    ) -> Result<HttpResponse, AppError> {
        if self.ssrf_protection {
            validate_url(&job.url).await?;
        }

        let method = Method::from_bytes(job.method.as_bytes())
            .map_err(|_| AppError::InvalidJob(format!("Invalid HTTP method '{}'", job.method)))?;
        let client = self.client_for(job)?;

        let mut request = client
            .request(method, &job.url)
            .timeout(job.timeout())
            .headers(build_headers(job, json_body.is_some()));
        if let Some(body) = json_body {
            request = request.body(serde_json::to_vec(body)?);
        }

        let response = request.send().await.map_err(|e| {
            if let Some(blocked) = blocked_redirect_in(&e) {
                AppError::SsrfBlocked(blocked.0.clone())
            } else if e.is_timeout() {
                AppError::Timeout(job.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: job.url.clone(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(job.timeout_secs)
            } else {
                AppError::HttpError(format!("Failed to read response body: {e}"))
            }
        })?;

        Ok(HttpResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

fn client_builder(ssrf_protection: bool) -> ClientBuilder {
    let policy = if ssrf_protection {
        Policy::custom(check_redirect)
    } else {
        Policy::limited(MAX_REDIRECTS)
    };
    Client::builder().redirect(policy)
}

/// A redirect refused because its target is not a public http(s) address.
#[derive(Debug)]
struct BlockedRedirect(String);

impl fmt::Display for BlockedRedirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for BlockedRedirect {}

fn check_redirect(attempt: Attempt) -> reqwest::redirect::Action {
    if attempt.previous().len() >= MAX_REDIRECTS {
        return attempt.error("too many redirects");
    }
    match redirect_target_blocked(attempt.url()) {
        Some(reason) => attempt.error(BlockedRedirect(reason)),
        None => attempt.follow(),
    }
}

/// Only literal hosts can be judged here; names are not resolved per hop.
fn redirect_target_blocked(url: &Url) -> Option<String> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Some(format!("redirect to '{scheme}' URL {url} refused")),
    }
    let private = match url.host() {
        Some(Host::Ipv4(ip)) => is_private_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_private_ip(IpAddr::V6(ip)),
        Some(Host::Domain(name)) => {
            let name = name.trim_end_matches('.').to_ascii_lowercase();
            name == "localhost" || name.ends_with(".localhost")
        }
        None => true,
    };
    private.then(|| format!("redirect to private/reserved address {url} refused"))
}

fn blocked_redirect_in(err: &reqwest::Error) -> Option<&BlockedRedirect> {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(blocked) = inner.downcast_ref::<BlockedRedirect>() {
            return Some(blocked);
        }
        source = inner.source();
    }
    None
}

/// User agent first, then the job's own headers, which win on conflict.
/// Headers that are not valid HTTP are skipped.
fn build_headers(job: &Job, json: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(&job.user_agent) {
        headers.insert(USER_AGENT, ua);
    }
    if json {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    for (name, value) in &job.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(job_id = %job.id, header = %name, "Skipping invalid header"),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::header::LOCATION;
    use axum::http::StatusCode;
    use axum::routing::get;
    use harvest_core::job::{JobDefinition, JobStatus, JobType};
    use tokio::net::TcpListener;

    use super::*;

    async fn redirecting_server(target: &'static str) -> String {
        let app = Router::new().route(
            "/hop",
            get(move || async move { (StatusCode::FOUND, [(LOCATION, target)]) }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/hop")
    }

    fn job(def: JobDefinition) -> Job {
        def.into_job(JobStatus::Queued, chrono::Utc::now()).unwrap()
    }

    #[test]
    fn job_headers_override_user_agent() {
        let j = job(
            JobDefinition::new("https://example.com", JobType::Static)
                .with_header("User-Agent", "custom/1.0")
                .with_header("X-Token", "abc"),
        );
        let headers = build_headers(&j, false);
        assert_eq!(headers[USER_AGENT], "custom/1.0");
        assert_eq!(headers["x-token"], "abc");
        assert!(headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn invalid_headers_are_skipped() {
        let j = job(
            JobDefinition::new("https://example.com", JobType::Api)
                .with_header("bad header", "x")
                .with_header("X-Ok", "yes"),
        );
        let headers = build_headers(&j, true);
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers["x-ok"], "yes");
        assert_eq!(headers.len(), 3);
    }

    #[tokio::test]
    async fn private_url_is_blocked_by_default() {
        let fetcher = HttpFetcher::new().unwrap();
        let j = job(JobDefinition::new("http://127.0.0.1:9/", JobType::Static));
        let err = fetcher.send(&j, None).await.unwrap_err();
        assert!(matches!(err, AppError::SsrfBlocked(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn bad_proxy_is_invalid_job() {
        let fetcher = HttpFetcher::allow_private_urls().unwrap();
        let j = job(
            JobDefinition::new("http://127.0.0.1:9/", JobType::Static).with_proxy("http://[bad"),
        );
        let err = fetcher.send(&j, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidJob(_)));
    }

    #[test]
    fn redirect_targets_are_screened() {
        let blocked = [
            "http://169.254.169.254/latest/meta-data",
            "http://10.0.0.1/",
            "http://[::1]:8080/",
            "http://localhost/admin",
            "http://api.localhost./",
            "file:///etc/passwd",
        ];
        for target in blocked {
            let url = Url::parse(target).unwrap();
            assert!(redirect_target_blocked(&url).is_some(), "{target} should be refused");
        }
        let url = Url::parse("https://example.com/next").unwrap();
        assert!(redirect_target_blocked(&url).is_none());
    }

    #[tokio::test]
    async fn redirect_to_metadata_address_is_blocked() {
        let hop = redirecting_server("http://169.254.169.254/latest/meta-data").await;
        // Public-looking first hop: skip the up-front check, keep the redirect guard.
        let fetcher = HttpFetcher {
            ssrf_protection: false,
            ..HttpFetcher::new().unwrap()
        };
        let j = job(JobDefinition::new(hop, JobType::Static));

        let err = fetcher.send(&j, None).await.unwrap_err();
        assert!(matches!(err, AppError::SsrfBlocked(_)), "got {err:?}");
        assert!(!err.is_retryable());
    }
}
