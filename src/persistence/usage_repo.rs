//! Usage snapshot repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::models::usage::UsageSnapshot;
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around the `usage_snapshots` table.
#[derive(Clone)]
pub struct UsageRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: i64,
    provider: String,
    polled_at: String,
    requests_limit: Option<i64>,
    requests_remaining: Option<i64>,
    requests_reset: Option<String>,
    input_tokens_limit: Option<i64>,
    input_tokens_remaining: Option<i64>,
    input_tokens_reset: Option<String>,
    output_tokens_limit: Option<i64>,
    output_tokens_remaining: Option<i64>,
    output_tokens_reset: Option<String>,
    tokens_limit: Option<i64>,
    tokens_remaining: Option<i64>,
    tokens_reset: Option<String>,
    poll_model: Option<String>,
    poll_status_code: i64,
    error_message: Option<String>,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<UsageSnapshot> {
        let polled_at = DateTime::parse_from_rfc3339(&self.polled_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| AppError::Db(format!("invalid polled_at: {e}")))?;
        Ok(UsageSnapshot {
            id: self.id,
            provider: self.provider,
            polled_at: Some(polled_at),
            requests_limit: self.requests_limit,
            requests_remaining: self.requests_remaining,
            requests_reset: self.requests_reset,
            input_tokens_limit: self.input_tokens_limit,
            input_tokens_remaining: self.input_tokens_remaining,
            input_tokens_reset: self.input_tokens_reset,
            output_tokens_limit: self.output_tokens_limit,
            output_tokens_remaining: self.output_tokens_remaining,
            output_tokens_reset: self.output_tokens_reset,
            tokens_limit: self.tokens_limit,
            tokens_remaining: self.tokens_remaining,
            tokens_reset: self.tokens_reset,
            poll_model: self.poll_model,
            poll_status_code: self.poll_status_code,
            error_message: self.error_message,
        })
    }
}

/// Aggregated poll statistics over a time window.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UsageSummary {
    pub total_polls: i64,
    pub error_polls: i64,
    pub at_request_limit: i64,
    pub at_input_limit: i64,
    pub at_output_limit: i64,
    pub min_requests_remaining: Option<i64>,
    pub min_input_remaining: Option<i64>,
    pub min_output_remaining: Option<i64>,
}

impl UsageRepo {
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a snapshot row, returning its id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert(&self, snapshot: &UsageSnapshot) -> Result<i64> {
        let polled_at = snapshot
            .polled_at
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO usage_snapshots
             (provider, polled_at,
              requests_limit, requests_remaining, requests_reset,
              input_tokens_limit, input_tokens_remaining, input_tokens_reset,
              output_tokens_limit, output_tokens_remaining, output_tokens_reset,
              tokens_limit, tokens_remaining, tokens_reset,
              poll_model, poll_status_code, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )
        .bind(&snapshot.provider)
        .bind(&polled_at)
        .bind(snapshot.requests_limit)
        .bind(snapshot.requests_remaining)
        .bind(&snapshot.requests_reset)
        .bind(snapshot.input_tokens_limit)
        .bind(snapshot.input_tokens_remaining)
        .bind(&snapshot.input_tokens_reset)
        .bind(snapshot.output_tokens_limit)
        .bind(snapshot.output_tokens_remaining)
        .bind(&snapshot.output_tokens_reset)
        .bind(snapshot.tokens_limit)
        .bind(snapshot.tokens_remaining)
        .bind(&snapshot.tokens_reset)
        .bind(&snapshot.poll_model)
        .bind(snapshot.poll_status_code)
        .bind(&snapshot.error_message)
        .execute(self.db.as_ref())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Most recent snapshot for a provider whose poll completed with a
    /// 200 or 429 — the reference point for reset detection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn latest_comparable(&self, provider: &str) -> Result<Option<UsageSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            "SELECT * FROM usage_snapshots
             WHERE provider = ?1 AND poll_status_code IN (200, 429)
             ORDER BY polled_at DESC LIMIT 1",
        )
        .bind(provider)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(SnapshotRow::into_snapshot).transpose()
    }

    /// Latest snapshot per provider.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn latest_per_provider(&self) -> Result<Vec<UsageSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            "WITH ranked AS (
               SELECT *, ROW_NUMBER() OVER(PARTITION BY provider ORDER BY polled_at DESC) AS rn
               FROM usage_snapshots
             )
             SELECT id, provider, polled_at,
                    requests_limit, requests_remaining, requests_reset,
                    input_tokens_limit, input_tokens_remaining, input_tokens_reset,
                    output_tokens_limit, output_tokens_remaining, output_tokens_reset,
                    tokens_limit, tokens_remaining, tokens_reset,
                    poll_model, poll_status_code, error_message
             FROM ranked WHERE rn = 1 ORDER BY provider",
        )
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(SnapshotRow::into_snapshot).collect()
    }

    /// Paginated snapshot history, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn history(
        &self,
        provider: Option<&str>,
        since: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<UsageSnapshot>, i64)> {
        let mut conditions: Vec<&str> = Vec::new();
        if provider.is_some() {
            conditions.push("provider = ?");
        }
        if since.is_some() {
            conditions.push("polled_at > ?");
        }
        let where_sql = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) AS cnt FROM usage_snapshots {where_sql}");
        let mut count_query = sqlx::query(&count_sql);
        if let Some(p) = provider {
            count_query = count_query.bind(p);
        }
        if let Some(s) = since {
            count_query = count_query.bind(s);
        }
        let total: i64 = count_query.fetch_one(self.db.as_ref()).await?.get("cnt");

        let list_sql = format!(
            "SELECT * FROM usage_snapshots {where_sql}
             ORDER BY polled_at DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query_as::<_, SnapshotRow>(&list_sql);
        if let Some(p) = provider {
            list_query = list_query.bind(p);
        }
        if let Some(s) = since {
            list_query = list_query.bind(s);
        }
        let rows = list_query
            .bind(limit)
            .bind(offset)
            .fetch_all(self.db.as_ref())
            .await?;

        let snapshots = rows
            .into_iter()
            .map(SnapshotRow::into_snapshot)
            .collect::<Result<Vec<_>>>()?;
        Ok((snapshots, total))
    }

    /// Aggregates over the last `hours` hours, optionally per provider.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn summary(&self, hours: i64, provider: Option<&str>) -> Result<UsageSummary> {
        let mut conditions = vec!["polled_at > datetime('now', ?)"];
        if provider.is_some() {
            conditions.push("provider = ?");
        }
        let where_sql = format!("WHERE {}", conditions.join(" AND "));

        let sql = format!(
            "SELECT COUNT(*) AS total_polls,
                    SUM(CASE WHEN error_message IS NOT NULL THEN 1 ELSE 0 END) AS error_polls,
                    SUM(CASE WHEN requests_remaining = 0 THEN 1 ELSE 0 END) AS at_request_limit,
                    SUM(CASE WHEN input_tokens_remaining = 0 THEN 1 ELSE 0 END) AS at_input_limit,
                    SUM(CASE WHEN output_tokens_remaining = 0 THEN 1 ELSE 0 END) AS at_output_limit,
                    MIN(requests_remaining) AS min_requests_remaining,
                    MIN(input_tokens_remaining) AS min_input_remaining,
                    MIN(output_tokens_remaining) AS min_output_remaining
             FROM usage_snapshots {where_sql}"
        );
        let mut query = sqlx::query(&sql).bind(format!("-{hours} hours"));
        if let Some(p) = provider {
            query = query.bind(p);
        }
        let row = query.fetch_one(self.db.as_ref()).await?;

        Ok(UsageSummary {
            total_polls: row.get("total_polls"),
            error_polls: row.get::<Option<i64>, _>("error_polls").unwrap_or(0),
            at_request_limit: row.get::<Option<i64>, _>("at_request_limit").unwrap_or(0),
            at_input_limit: row.get::<Option<i64>, _>("at_input_limit").unwrap_or(0),
            at_output_limit: row.get::<Option<i64>, _>("at_output_limit").unwrap_or(0),
            min_requests_remaining: row.get("min_requests_remaining"),
            min_input_remaining: row.get("min_input_remaining"),
            min_output_remaining: row.get("min_output_remaining"),
        })
    }

    /// Purge snapshots older than the retention horizon. Returns the
    /// number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge_older_than(&self, hours: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM usage_snapshots WHERE polled_at < datetime('now', ?1)",
        )
        .bind(format!("-{hours} hours"))
        .execute(self.db.as_ref())
        .await?;
        Ok(result.rows_affected())
    }
}
