use chrono::{Duration, Utc};
use harvest_core::error::AppError;
use harvest_core::job::{FetchOutcome, JobStatus, ScrapeResult};
use harvest_core::store::JobStore;
use serde_json::json;

use crate::integration::common::{make_job, setup_test_store};

#[tokio::test]
async fn results_are_listed_newest_first() {
    let (store, _container) = setup_test_store().await;
    let job = make_job("https://example.com", JobStatus::Queued);
    store.insert_job(&job).await.unwrap();

    let mut first = ScrapeResult::failure(&job, &AppError::NetworkError("reset".into()), 40);
    first.scraped_at = Utc::now() - Duration::minutes(1);
    let second = ScrapeResult::success(
        &job,
        FetchOutcome {
            status_code: 200,
            data: json!({"title": "Example"}),
            html: Some("<h1>Example</h1>".into()),
            screenshot: Some(vec![0x89, b'P', b'N', b'G']),
        },
        120,
    );
    store.save_result(&first).await.unwrap();
    store.save_result(&second).await.unwrap();

    let results = store.list_results(job.id, 10).await.unwrap();
    assert_eq!(results.len(), 2);

    assert_eq!(results[0].id, second.id);
    assert_eq!(results[0].status_code, Some(200));
    assert_eq!(results[0].data["title"], "Example");
    assert_eq!(results[0].html.as_deref(), Some("<h1>Example</h1>"));
    assert_eq!(results[0].screenshot.as_deref(), Some(&[0x89, b'P', b'N', b'G'][..]));
    assert_eq!(results[0].duration_ms, 120);
    assert!(results[0].is_success());

    assert_eq!(results[1].id, first.id);
    assert!(results[1].error.as_deref().unwrap().contains("reset"));
    assert!(!results[1].is_success());
}

#[tokio::test]
async fn saving_same_result_twice_is_a_no_op() {
    let (store, _container) = setup_test_store().await;
    let job = make_job("https://example.com", JobStatus::Queued);
    store.insert_job(&job).await.unwrap();

    let result = ScrapeResult::failure(&job, &AppError::Timeout(30), 30_000);
    store.save_result(&result).await.unwrap();
    store.save_result(&result).await.unwrap();

    assert_eq!(store.list_results(job.id, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn results_for_unknown_job_are_empty() {
    let (store, _container) = setup_test_store().await;
    let results = store.list_results(uuid::Uuid::new_v4(), 10).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn nul_characters_are_dropped_before_insert() {
    let (store, _container) = setup_test_store().await;
    let job = make_job("https://example.com", JobStatus::Queued);
    store.insert_job(&job).await.unwrap();

    let mut result = ScrapeResult::success(
        &job,
        FetchOutcome {
            status_code: 200,
            data: json!({"title": "x\u{0000}y", "links": ["a\u{0000}"]}),
            html: Some("<p>a\0b</p>".into()),
            screenshot: None,
        },
        15,
    );
    result.error = Some("bad\0byte".into());
    store.save_result(&result).await.unwrap();

    let saved = store.list_results(job.id, 10).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].html.as_deref(), Some("<p>ab</p>"));
    assert_eq!(saved[0].data["title"], "xy");
    assert_eq!(saved[0].data["links"][0], "a");
    assert_eq!(saved[0].error.as_deref(), Some("badbyte"));
}
