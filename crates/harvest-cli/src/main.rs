use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use harvest_client::StrategyRunner;
use harvest_core::job::{JobDefinition, JobStatus, JobType};
use harvest_core::{JobStore, MemoryJobStore, Orchestrator, OrchestratorConfig};
use harvest_db::{Database, DatabaseConfig, PgJobStore};

#[derive(Parser)]
#[command(name = "harvest", version, about = "Scrape job orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers and pollers against PostgreSQL until Ctrl-C
    Run {
        /// Number of concurrent workers (overrides HARVEST_WORKERS)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Allow jobs to target private and loopback addresses
        #[arg(long, default_value_t = false)]
        allow_private_urls: bool,
    },

    /// Store a job for a running engine to pick up
    Submit {
        #[command(flatten)]
        job: JobArgs,

        /// Recurrence, e.g. "30m", "1h30m" or a cron expression
        #[arg(long)]
        schedule: Option<String>,
    },

    /// Run a single job in-process and print its result
    Scrape {
        #[command(flatten)]
        job: JobArgs,

        /// Include the raw HTML in the printed result
        #[arg(long, default_value_t = false)]
        html: bool,

        /// Allow private and loopback targets
        #[arg(long, default_value_t = false)]
        allow_private_urls: bool,
    },

    /// List stored jobs
    Jobs {
        /// Only show jobs in this status (queued, running, completed, ...)
        #[arg(short, long)]
        status: Option<JobStatus>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the results recorded for a job
    Results {
        job_id: Uuid,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Args)]
struct JobArgs {
    /// Target URL
    #[arg(short, long)]
    url: String,

    /// Fetch strategy: static, dynamic or api
    #[arg(short = 't', long = "type", default_value = "static")]
    job_type: JobType,

    /// Extraction rule as FIELD=SELECTOR (repeatable)
    #[arg(short, long = "selector", value_parser = parse_selector)]
    selectors: Vec<(String, String)>,

    /// Request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// JSON object sent as the request body (api jobs)
    #[arg(long)]
    payload: Option<String>,

    #[arg(short, long)]
    method: Option<String>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long)]
    user_agent: Option<String>,

    #[arg(long)]
    proxy: Option<String>,

    /// Render the page in a headless browser
    #[arg(long, default_value_t = false)]
    javascript: bool,

    /// CSS selector to wait for before extracting (dynamic jobs)
    #[arg(long)]
    wait_for: Option<String>,

    #[arg(long, default_value_t = 0)]
    priority: i32,
}

impl JobArgs {
    fn into_definition(self) -> Result<JobDefinition> {
        let payload = self
            .payload
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .context("--payload is not valid JSON")?;

        let mut def = JobDefinition::new(self.url, self.job_type);
        for (field, expr) in self.selectors {
            def = def.with_selector(field, expr);
        }
        for (name, value) in self.headers {
            def = def.with_header(name, value);
        }
        def.payload = payload;
        def.method = self.method;
        def.max_retries = self.max_retries;
        def.timeout_secs = self.timeout;
        def.user_agent = self.user_agent;
        def.proxy_url = self.proxy;
        def.javascript = self.javascript;
        def.wait_for = self.wait_for;
        def.priority = self.priority;
        Ok(def)
    }
}

fn parse_selector(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, expr)) if !field.trim().is_empty() && !expr.trim().is_empty() => {
            Ok((field.trim().to_string(), expr.trim().to_string()))
        }
        _ => Err(format!("expected FIELD=SELECTOR, got '{raw}'")),
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected \"Name: value\", got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("harvest_core=info".parse()?)
                .add_directive("harvest_client=info".parse()?)
                .add_directive("harvest_db=info".parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workers,
            allow_private_urls,
        } => cmd_run(workers, allow_private_urls).await,
        Commands::Submit { job, schedule } => cmd_submit(job, schedule).await,
        Commands::Scrape {
            job,
            html,
            allow_private_urls,
        } => cmd_scrape(job, html, allow_private_urls).await,
        Commands::Jobs { status, limit } => cmd_jobs(status, limit).await,
        Commands::Results { job_id, limit } => cmd_results(job_id, limit).await,
    }
}

async fn connect_store() -> Result<PgJobStore> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db.job_store())
}

fn build_runner(allow_private_urls: bool) -> Result<StrategyRunner> {
    let runner = if allow_private_urls {
        StrategyRunner::allow_private_urls()
    } else {
        StrategyRunner::new()
    };
    runner.context("Failed to create HTTP client")
}

async fn cmd_run(workers: Option<usize>, allow_private_urls: bool) -> Result<()> {
    let store = connect_store().await?;
    let mut config = OrchestratorConfig::from_env()?;
    if let Some(workers) = workers {
        if workers == 0 {
            bail!("--workers must be at least 1");
        }
        config = config.with_workers(workers);
    }

    let orchestrator = Orchestrator::new(store, build_runner(allow_private_urls)?, config);
    orchestrator.start().await?;
    tracing::info!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    orchestrator.stop().await;
    Ok(())
}

async fn cmd_submit(job: JobArgs, schedule: Option<String>) -> Result<()> {
    let store = connect_store().await?;
    let mut def = job.into_definition()?;
    def.schedule = schedule;

    // Scheduled-now: the due poller of a running engine enqueues it.
    let now = Utc::now();
    let mut job = def.into_job(JobStatus::Scheduled, now)?;
    job.next_run = Some(now);
    store.insert_job(&job).await?;

    println!("{}", job.id);
    Ok(())
}

async fn cmd_scrape(job: JobArgs, include_html: bool, allow_private_urls: bool) -> Result<()> {
    let mut def = job.into_definition()?;
    def.max_retries = def.max_retries.or(Some(0));

    let store = MemoryJobStore::new();
    let config = OrchestratorConfig::from_env()?.with_workers(1);
    let orchestrator = Orchestrator::new(store.clone(), build_runner(allow_private_urls)?, config);
    orchestrator.start().await?;

    let job_id = orchestrator.submit_job(def).await?;
    let status = loop {
        let job = store
            .get_job(job_id)
            .await?
            .context("Submitted job disappeared from the store")?;
        if job.status.is_terminal() {
            break job.status;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };
    orchestrator.stop().await;

    let mut result = store
        .list_results(job_id, 1)
        .await?
        .into_iter()
        .next()
        .context("Job finished without a result")?;
    if !include_html {
        result.html = None;
    }
    if let Some(shot) = result.screenshot.take() {
        tracing::info!(bytes = shot.len(), "Screenshot captured (not printed)");
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    if status == JobStatus::Failed {
        bail!(
            "Scrape failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn cmd_jobs(status: Option<JobStatus>, limit: usize) -> Result<()> {
    let store = connect_store().await?;
    let jobs = store.list_jobs(status, limit).await?;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    for job in &jobs {
        println!(
            "{}  {:<13} {:<7} retries {}/{}  {}  {}",
            job.id,
            job.status.as_str(),
            job.job_type.as_str(),
            job.retry_count,
            job.max_retries,
            job.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            job.url,
        );
    }
    println!("\nTotal: {} jobs", jobs.len());
    Ok(())
}

async fn cmd_results(job_id: Uuid, limit: usize) -> Result<()> {
    let store = connect_store().await?;
    let mut results = store.list_results(job_id, limit).await?;
    if results.is_empty() {
        println!("No results found for job {job_id}");
        return Ok(());
    }

    for result in &mut results {
        result.html = None;
        result.screenshot = None;
    }
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
