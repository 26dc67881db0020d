use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use harvest_core::error::AppError;
use harvest_core::job::{FetchOutcome, Job};
use harvest_core::selector::{ExtractAction, compile};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::extract::dom_script;
use crate::ssrf::validate_url;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Headless-Chromium strategy for JavaScript-rendered pages.
///
/// A single Chromium process, launched on first use, is shared across all
/// clones; every job gets its own tab. Jobs with a `proxy_url` run in a
/// dedicated browser started with that proxy and shut down afterwards.
///
/// Requires a Chromium / Chrome binary reachable via `$PATH`, `CHROME_BIN`,
/// or one of the usual install locations.
#[derive(Clone)]
pub struct DynamicStrategy {
    shared: Arc<OnceCell<Browser>>,
    ssrf_protection: bool,
}

impl Default for DynamicStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicStrategy {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(OnceCell::new()),
            ssrf_protection: true,
        }
    }

    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    pub async fn fetch(&self, job: &Job) -> Result<FetchOutcome, AppError> {
        if self.ssrf_protection {
            validate_url(&job.url).await?;
        }
        let deadline = Instant::now() + job.timeout();

        match job.proxy_url.as_deref() {
            None => {
                let browser = within(deadline, job.timeout_secs, async {
                    self.shared
                        .get_or_try_init(|| async {
                            let (browser, _handler) = launch(None).await?;
                            Ok::<_, AppError>(browser)
                        })
                        .await
                })
                .await?;
                run_session(browser, job, deadline).await
            }
            Some(proxy) => {
                let (mut browser, handler) =
                    within(deadline, job.timeout_secs, launch(Some(proxy))).await?;
                let result = run_session(&browser, job, deadline).await;
                let teardown = tokio::time::timeout_at(deadline, async {
                    if let Err(e) = browser.close().await {
                        tracing::debug!(job_id = %job.id, error = %e, "Proxy browser close failed");
                    }
                    let _ = browser.wait().await;
                })
                .await;
                if teardown.is_err() {
                    tracing::warn!(job_id = %job.id, "Proxy browser shutdown hit the deadline");
                }
                handler.abort();
                result
            }
        }
    }
}

/// Run `fut` until `deadline`; expiry becomes `AppError::Timeout`.
async fn within<T, F>(deadline: Instant, timeout_secs: u64, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| AppError::Timeout(timeout_secs))?
}

/// One tab, bounded by `deadline`, closed on every path.
async fn run_session(
    browser: &Browser,
    job: &Job,
    deadline: Instant,
) -> Result<FetchOutcome, AppError> {
    let page = tokio::time::timeout_at(deadline, browser.new_page("about:blank"))
        .await
        .map_err(|_| AppError::Timeout(job.timeout_secs))?
        .map_err(|e| AppError::BrowserError(format!("Failed to open tab: {e}")))?;

    let result = tokio::time::timeout_at(deadline, drive(&page, job))
        .await
        .unwrap_or(Err(AppError::Timeout(job.timeout_secs)));

    if let Err(e) = page.close().await {
        tracing::debug!(job_id = %job.id, error = %e, "Failed to close tab");
    }
    result
}

async fn drive(page: &Page, job: &Job) -> Result<FetchOutcome, AppError> {
    page.set_user_agent(job.user_agent.as_str())
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to set user agent: {e}")))?;
    page.goto(job.url.as_str())
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to navigate to {}: {e}", job.url)))?;

    match job.wait_for.as_deref() {
        Some(selector) => wait_for_selector(page, selector).await,
        None => wait_for_ready(page).await,
    }

    let data = run_actions(page, &compile(&job.selectors)).await;

    let html = page
        .content()
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to read page content: {e}")))?;

    let params = ScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Png)
        .full_page(true)
        .build();
    let screenshot = page
        .screenshot(params)
        .await
        .map_err(|e| AppError::BrowserError(format!("Screenshot failed: {e}")))?;

    tracing::debug!(
        job_id = %job.id,
        bytes = html.len(),
        screenshot_bytes = screenshot.len(),
        "Page rendered"
    );

    // CDP does not surface the document status here; a rendered page counts as 200.
    Ok(FetchOutcome {
        status_code: 200,
        data,
        html: Some(html),
        screenshot: Some(screenshot),
    })
}

/// Poll until `selector` matches. The session deadline bounds the wait.
async fn wait_for_selector(page: &Page, selector: &str) {
    while page.find_element(selector).await.is_err() {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn wait_for_ready(page: &Page) {
    loop {
        let state = match page.evaluate("document.readyState").await {
            Ok(result) => result.into_value::<String>().ok(),
            Err(_) => None,
        };
        if state.as_deref() == Some("complete") {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Evaluate actions one after another against the live DOM, in key order.
async fn run_actions(page: &Page, actions: &[ExtractAction]) -> Value {
    let mut out = Map::with_capacity(actions.len());
    for action in actions {
        let value = match page.evaluate(dom_script(&action.rule)).await {
            Ok(result) => result
                .into_value::<Value>()
                .ok()
                .filter(|v| !v.is_null())
                .unwrap_or_else(|| action.rule.empty_value()),
            Err(e) => {
                tracing::debug!(field = %action.field, error = %e, "Extraction script failed");
                action.rule.empty_value()
            }
        };
        out.insert(action.field.clone(), value);
    }
    Value::Object(out)
}

async fn launch(proxy: Option<&str>) -> Result<(Browser, JoinHandle<()>), AppError> {
    let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();
    if let Some(bin) = find_chrome_binary() {
        tracing::debug!("Using Chrome binary: {}", bin.display());
        builder = builder.chrome_executable(bin);
    }
    builder = builder
        .arg("--headless=new")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--no-first-run");
    if let Some(proxy) = proxy {
        builder = builder.arg(format!("--proxy-server={proxy}"));
    }

    let config = builder
        .build()
        .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;
    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

    // The CDP handler must be polled continuously for the connection to work.
    let handle = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                tracing::warn!("Browser CDP handler error: {event:?}");
                break;
            }
        }
    });

    tracing::info!(proxied = proxy.is_some(), "Browser launched");
    Ok((browser, handle))
}

/// Snap-packaged Chromium ships a wrapper that rejects the headless flags,
/// so look for the real binary before letting chromiumoxide search `$PATH`.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}
