use chrono::{Duration, Utc};
use harvest_core::error::AppError;
use harvest_core::job::{JobDefinition, JobStatus, JobType};
use harvest_core::store::JobStore;
use serde_json::json;

use crate::integration::common::{make_job, setup_test_store};

#[tokio::test]
async fn insert_and_get_round_trips_every_field() {
    let (store, _container) = setup_test_store().await;

    let job = JobDefinition::new("https://api.example.com/search", JobType::Api)
        .with_header("X-Token", "secret")
        .with_payload(json!({"q": "rust"}))
        .with_selector("title", "h1")
        .with_selector("links", "a@href")
        .with_schedule("1h")
        .with_max_retries(5)
        .with_timeout_secs(12)
        .with_proxy("http://proxy.local:3128")
        .with_wait_for("#app")
        .with_priority(7)
        .into_job(JobStatus::Queued, Utc::now())
        .unwrap();
    store.insert_job(&job).await.unwrap();

    let loaded = store.get_job(job.id).await.unwrap().expect("job exists");
    assert_eq!(loaded.url, job.url);
    assert_eq!(loaded.job_type, JobType::Api);
    assert_eq!(loaded.method, "POST");
    assert_eq!(loaded.headers.get("X-Token").map(String::as_str), Some("secret"));
    assert_eq!(loaded.payload, Some(json!({"q": "rust"})));
    assert_eq!(loaded.selectors, job.selectors);
    assert_eq!(loaded.schedule.as_deref(), Some("1h"));
    assert_eq!(loaded.max_retries, 5);
    assert_eq!(loaded.timeout_secs, 12);
    assert_eq!(loaded.proxy_url.as_deref(), Some("http://proxy.local:3128"));
    assert_eq!(loaded.wait_for.as_deref(), Some("#app"));
    assert_eq!(loaded.priority, 7);
    assert_eq!(loaded.status, JobStatus::Queued);
    assert_eq!(loaded.retry_count, 0);
}

#[tokio::test]
async fn out_of_range_limits_are_rejected_not_truncated() {
    let (store, _container) = setup_test_store().await;
    let mut job = make_job("https://example.com", JobStatus::Queued);
    job.max_retries = u32::MAX;

    let err = store.insert_job(&job).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidJob(_)));
    assert!(store.get_job(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn get_missing_job_returns_none() {
    let (store, _container) = setup_test_store().await;
    assert!(store.get_job(uuid::Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn list_and_count_filter_by_status() {
    let (store, _container) = setup_test_store().await;

    for status in [JobStatus::Queued, JobStatus::Queued, JobStatus::Failed] {
        store
            .insert_job(&make_job("https://example.com", status))
            .await
            .unwrap();
    }

    assert_eq!(store.list_jobs(None, 10).await.unwrap().len(), 3);
    assert_eq!(store.list_jobs(Some(JobStatus::Queued), 10).await.unwrap().len(), 2);
    assert_eq!(store.list_jobs(None, 1).await.unwrap().len(), 1);
    assert_eq!(store.count_by_status(JobStatus::Failed).await.unwrap(), 1);
    assert_eq!(store.count_by_status(JobStatus::Running).await.unwrap(), 0);
}

#[tokio::test]
async fn run_lifecycle_updates_status_and_retry_count() {
    let (store, _container) = setup_test_store().await;
    let job = make_job("https://example.com", JobStatus::Queued);
    store.insert_job(&job).await.unwrap();

    store.mark_running(job.id).await.unwrap();
    let running = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.updated_at >= job.updated_at - Duration::seconds(1));

    store
        .finish_run(job.id, JobStatus::RetryPending, 1)
        .await
        .unwrap();
    let failed = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::RetryPending);
    assert_eq!(failed.retry_count, 1);
}

#[tokio::test]
async fn transition_only_applies_from_expected_status() {
    let (store, _container) = setup_test_store().await;
    let job = make_job("https://example.com", JobStatus::RetryPending);
    store.insert_job(&job).await.unwrap();

    assert!(
        !store
            .transition(job.id, JobStatus::Running, JobStatus::Queued)
            .await
            .unwrap()
    );
    assert!(
        store
            .transition(job.id, JobStatus::RetryPending, JobStatus::Queued)
            .await
            .unwrap()
    );
    let loaded = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Queued);
}

#[tokio::test]
async fn due_jobs_and_claim_due() {
    let (store, _container) = setup_test_store().await;
    let now = Utc::now();

    let mut due_low = make_job("https://example.com/low", JobStatus::Scheduled);
    due_low.next_run = Some(now - Duration::minutes(5));
    let mut due_high = make_job("https://example.com/high", JobStatus::Scheduled);
    due_high.next_run = Some(now - Duration::minutes(1));
    due_high.priority = 10;
    let mut later = make_job("https://example.com/later", JobStatus::Scheduled);
    later.next_run = Some(now + Duration::hours(1));
    for job in [&due_low, &due_high, &later] {
        store.insert_job(job).await.unwrap();
    }

    let due = store.due_jobs(now, 10).await.unwrap();
    let ids: Vec<_> = due.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![due_high.id, due_low.id]);

    let next = now + Duration::hours(1);
    assert!(store.claim_due(due_high.id, next).await.unwrap());
    assert!(!store.claim_due(due_high.id, next).await.unwrap());

    let claimed = store.get_job(due_high.id).await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Queued);
    let stored_next = claimed.next_run.expect("next_run recorded");
    assert!((stored_next - next).num_milliseconds().abs() < 1);
}

#[tokio::test]
async fn retry_candidates_respect_budget() {
    let (store, _container) = setup_test_store().await;

    let mut eligible = make_job("https://example.com/a", JobStatus::RetryPending);
    eligible.retry_count = 1;
    let mut exhausted = make_job("https://example.com/b", JobStatus::RetryPending);
    exhausted.retry_count = exhausted.max_retries;
    let queued = make_job("https://example.com/c", JobStatus::Queued);
    for job in [&eligible, &exhausted, &queued] {
        store.insert_job(job).await.unwrap();
    }

    let candidates = store.retry_candidates(10).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].id, eligible.id);
}

#[tokio::test]
async fn stale_queued_uses_cutoff() {
    let (store, _container) = setup_test_store().await;
    let now = Utc::now();

    let mut stale = make_job("https://example.com/stale", JobStatus::Queued);
    stale.updated_at = now - Duration::minutes(10);
    let fresh = make_job("https://example.com/fresh", JobStatus::Queued);
    store.insert_job(&stale).await.unwrap();
    store.insert_job(&fresh).await.unwrap();

    let found = store
        .stale_queued(now - Duration::minutes(5), 10)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, stale.id);
}

#[tokio::test]
async fn recover_interrupted_resets_running_jobs() {
    let (store, _container) = setup_test_store().await;

    let running = make_job("https://example.com/running", JobStatus::Running);
    let mut queued = make_job("https://example.com/queued", JobStatus::Queued);
    queued.priority = 5;
    let done = make_job("https://example.com/done", JobStatus::Completed);
    for job in [&running, &queued, &done] {
        store.insert_job(job).await.unwrap();
    }

    let recovered = store.recover_interrupted(10).await.unwrap();
    let ids: Vec<_> = recovered.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![queued.id, running.id]);
    assert!(recovered.iter().all(|j| j.status == JobStatus::Queued));
    assert_eq!(store.count_by_status(JobStatus::Running).await.unwrap(), 0);
    assert_eq!(store.count_by_status(JobStatus::Completed).await.unwrap(), 1);
}
