/// Smoke-test for `DynamicStrategy`.
///
/// Launches a headless Chromium, renders <https://example.com>, extracts the
/// `<h1>` and checks that a screenshot came back.
///
/// Run with:
///   cargo run -p harvest-client --example browser_smoke --features browser
use harvest_client::DynamicStrategy;
use harvest_core::job::{JobDefinition, JobStatus, JobType};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let job = JobDefinition::new("https://example.com", JobType::Dynamic)
        .with_selector("title", "h1")
        .with_selector("links", "a@href")
        .with_wait_for("h1")
        .into_job(JobStatus::Queued, chrono::Utc::now())?;

    println!("Rendering {} …", job.url);
    let outcome = DynamicStrategy::new().fetch(&job).await?;

    anyhow::ensure!(
        outcome.data["title"] == "Example Domain",
        "unexpected title: {}",
        outcome.data["title"]
    );
    let screenshot = outcome.screenshot.unwrap_or_default();
    anyhow::ensure!(screenshot.starts_with(b"\x89PNG"), "screenshot is not a PNG");

    println!("{}", serde_json::to_string_pretty(&outcome.data)?);
    println!(
        "OK: {} bytes of HTML, {} byte screenshot",
        outcome.html.map(|h| h.len()).unwrap_or_default(),
        screenshot.len()
    );
    Ok(())
}
