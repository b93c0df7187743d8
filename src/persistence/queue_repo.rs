//! Deferred command queue repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::models::queue::{QueueEntry, QueueStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around the `command_queue` table.
#[derive(Clone)]
pub struct QueueRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: i64,
    session_name: String,
    host: String,
    command: String,
    status: String,
    priority: i64,
    created_at: String,
    updated_at: String,
    executed_at: Option<String>,
    error: Option<String>,
}

impl QueueRow {
    fn into_entry(self) -> Result<QueueEntry> {
        let status = QueueStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid queue status: {}", self.status)))?;
        Ok(QueueEntry {
            id: self.id,
            session_name: self.session_name,
            host: self.host,
            command: self.command,
            status,
            priority: self.priority,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            executed_at: self
                .executed_at
                .as_deref()
                .map(parse_ts)
                .transpose()?,
            error: self.error,
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid queue timestamp: {e}")))
}

impl QueueRepo {
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Enqueue a pending command, returning the stored entry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn enqueue(
        &self,
        session_name: &str,
        host: &str,
        command: &str,
        priority: i64,
    ) -> Result<QueueEntry> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO command_queue
             (session_name, host, command, status, priority, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?5)",
        )
        .bind(session_name)
        .bind(host)
        .bind(command)
        .bind(priority)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;

        self.get(result.last_insert_rowid())
            .await?
            .ok_or_else(|| AppError::Db("queue entry vanished after insert".into()))
    }

    /// Fetch an entry by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, id: i64) -> Result<Option<QueueEntry>> {
        let row: Option<QueueRow> = sqlx::query_as("SELECT * FROM command_queue WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(QueueRow::into_entry).transpose()
    }

    /// Pending entries in drain order: priority descending, then oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn pending(&self, limit: i64) -> Result<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT * FROM command_queue WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(QueueRow::into_entry).collect()
    }

    /// Paginated listing, pending and executing entries first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(
        &self,
        status: Option<QueueStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<QueueEntry>, i64)> {
        let where_sql = if status.is_some() {
            "WHERE status = ?"
        } else {
            ""
        };

        let count_sql = format!("SELECT COUNT(*) AS cnt FROM command_queue {where_sql}");
        let mut count_query = sqlx::query(&count_sql);
        if let Some(s) = status {
            count_query = count_query.bind(s.as_str());
        }
        let total: i64 = count_query.fetch_one(self.db.as_ref()).await?.get("cnt");

        let list_sql = format!(
            "SELECT * FROM command_queue {where_sql}
             ORDER BY
                 CASE status WHEN 'pending' THEN 0 WHEN 'executing' THEN 1 ELSE 2 END,
                 priority DESC, created_at ASC
             LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query_as::<_, QueueRow>(&list_sql);
        if let Some(s) = status {
            list_query = list_query.bind(s.as_str());
        }
        let rows = list_query
            .bind(limit)
            .bind(offset)
            .fetch_all(self.db.as_ref())
            .await?;

        let entries = rows
            .into_iter()
            .map(QueueRow::into_entry)
            .collect::<Result<Vec<_>>>()?;
        Ok((entries, total))
    }

    /// Move an entry to a new status, recording `executed_at` for
    /// terminal outcomes and capturing error text on failure.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_status(
        &self,
        id: i64,
        status: QueueStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        match status {
            QueueStatus::Completed | QueueStatus::Failed => {
                sqlx::query(
                    "UPDATE command_queue
                     SET status = ?1, executed_at = ?2, updated_at = ?2, error = ?3
                     WHERE id = ?4",
                )
                .bind(status.as_str())
                .bind(&now)
                .bind(error)
                .bind(id)
                .execute(self.db.as_ref())
                .await?;
            }
            _ => {
                sqlx::query(
                    "UPDATE command_queue SET status = ?1, updated_at = ?2 WHERE id = ?3",
                )
                .bind(status.as_str())
                .bind(&now)
                .bind(id)
                .execute(self.db.as_ref())
                .await?;
            }
        }
        Ok(())
    }

    /// Cancel a pending entry. Cancelling anything else fails as
    /// not-found.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the entry is absent or not
    /// pending, `AppError::Db` on query failure.
    pub async fn cancel(&self, id: i64) -> Result<()> {
        let entry = self
            .get(id)
            .await?
            .filter(|e| e.status == QueueStatus::Pending)
            .ok_or_else(|| {
                AppError::NotFound(format!("command {id} not found or not pending"))
            })?;
        self.set_status(entry.id, QueueStatus::Cancelled, None).await
    }

    /// Entry counts per status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn stats(&self) -> Result<Vec<(String, i64)>> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS cnt FROM command_queue GROUP BY status")
                .fetch_all(self.db.as_ref())
                .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("status"), row.get("cnt")))
            .collect())
    }
}
