use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use harvest_core::error::AppError;
use harvest_core::job::ScrapeResult;

/// Append-only storage for the `job_results` table.
#[derive(Clone)]
pub struct ResultRepository {
    pool: PgPool,
}

impl ResultRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a result row. A second insert with the same id is ignored.
    ///
    /// PostgreSQL text and jsonb cannot hold NUL, so NUL characters are
    /// dropped from every text column and every string inside `data`.
    pub async fn save(&self, result: &ScrapeResult) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO job_results (
                id, job_id, url, status_code, data, html, screenshot, error, duration_ms, scraped_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(result.id)
        .bind(result.job_id)
        .bind(strip_nul(&result.url))
        .bind(result.status_code.map(i32::from))
        .bind(strip_nul_json(&result.data))
        .bind(result.html.as_deref().map(strip_nul))
        .bind(&result.screenshot)
        .bind(result.error.as_deref().map(strip_nul))
        .bind(i64::try_from(result.duration_ms).unwrap_or(i64::MAX))
        .bind(result.scraped_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    pub async fn list_for_job(
        &self,
        job_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ScrapeResult>, AppError> {
        let rows = sqlx::query_as::<_, ResultRow>(
            r#"
            SELECT * FROM job_results
            WHERE job_id = $1
            ORDER BY scraped_at DESC
            LIMIT $2
            "#,
        )
        .bind(job_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

fn strip_nul(text: &str) -> Cow<'_, str> {
    if text.contains('\0') {
        Cow::Owned(text.replace('\0', ""))
    } else {
        Cow::Borrowed(text)
    }
}

fn strip_nul_json(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(strip_nul(s).into_owned()),
        Value::Array(items) => Value::Array(items.iter().map(strip_nul_json).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (strip_nul(k).into_owned(), strip_nul_json(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: Uuid,
    job_id: Uuid,
    url: String,
    status_code: Option<i32>,
    data: serde_json::Value,
    html: Option<String>,
    screenshot: Option<Vec<u8>>,
    error: Option<String>,
    duration_ms: i64,
    scraped_at: DateTime<Utc>,
}

impl From<ResultRow> for ScrapeResult {
    fn from(row: ResultRow) -> Self {
        ScrapeResult {
            id: row.id,
            job_id: row.job_id,
            url: row.url,
            status_code: row.status_code.and_then(|s| u16::try_from(s).ok()),
            data: row.data,
            html: row.html,
            screenshot: row.screenshot,
            error: row.error,
            duration_ms: row.duration_ms.max(0) as u64,
            scraped_at: row.scraped_at,
        }
    }
}
