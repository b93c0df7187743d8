//! Message repository: insert-or-ignore persistence and FTS search.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::models::message::{Message, MessageRole, MessageSource, NewMessage};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for message rows.
#[derive(Clone)]
pub struct MessageRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    session_name: String,
    role: String,
    content: String,
    source: String,
    source_id: Option<String>,
    source_author: Option<String>,
    timestamp: String,
    ingested_at: String,
    dedup_hash: String,
}

impl MessageRow {
    fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: self.id,
            session_name: self.session_name,
            role: MessageRole::parse(&self.role),
            content: self.content,
            source: MessageSource::parse(&self.source),
            source_id: self.source_id,
            source_author: self.source_author,
            timestamp: parse_ts(&self.timestamp)?,
            ingested_at: parse_ts(&self.ingested_at)?,
            dedup_hash: self.dedup_hash,
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid message timestamp: {e}")))
}

/// One ranked full-text search hit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub session_name: String,
    pub role: String,
    pub content: String,
    pub timestamp: String,
    /// Boundary snippet with `<mark>` highlighting.
    pub snippet: String,
}

impl MessageRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a message, ignoring duplicates by dedup fingerprint.
    ///
    /// Returns `true` only when a fresh row was written — the duplicate
    /// path is the common-case idempotent no-op, not a failure.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails for another reason.
    pub async fn insert_or_ignore(&self, message: &NewMessage) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO messages
             (session_name, role, content, source, source_id, source_author,
              timestamp, ingested_at, dedup_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&message.session_name)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.source.as_str())
        .bind(&message.source_id)
        .bind(&message.source_author)
        .bind(message.timestamp.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(&message.dedup_hash)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Page through a session's messages in timestamp order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_session(
        &self,
        session_name: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Message>, i64)> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages WHERE session_name = ?1
             ORDER BY timestamp ASC LIMIT ?2 OFFSET ?3",
        )
        .bind(session_name)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.as_ref())
        .await?;

        let total = self.count_for_session(session_name).await?;
        let messages = rows
            .into_iter()
            .map(MessageRow::into_message)
            .collect::<Result<Vec<_>>>()?;
        Ok((messages, total))
    }

    /// All of a session's messages in timestamp order, for export.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_all_for_session(&self, session_name: &str) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages WHERE session_name = ?1 ORDER BY timestamp ASC",
        )
        .bind(session_name)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Message count for one session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_for_session(&self, session_name: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM messages WHERE session_name = ?1")
            .bind(session_name)
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(row.get("cnt"))
    }

    /// Total message count, plus the count ingested in the last 24 hours.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn totals(&self) -> Result<(i64, i64)> {
        let total = sqlx::query("SELECT COUNT(*) AS cnt FROM messages")
            .fetch_one(self.db.as_ref())
            .await?
            .get("cnt");
        let recent = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM messages
             WHERE timestamp > datetime('now', '-24 hours')",
        )
        .fetch_one(self.db.as_ref())
        .await?
        .get("cnt");
        Ok((total, recent))
    }

    /// Highest stored platform `source_id` for a (session, source) pair —
    /// the incremental sync cursor.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn latest_source_id(
        &self,
        session_name: &str,
        source: MessageSource,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT source_id FROM messages
             WHERE session_name = ?1 AND source = ?2 AND source_id IS NOT NULL
             ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(session_name)
        .bind(source.as_str())
        .fetch_optional(self.db.as_ref())
        .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>("source_id")))
    }

    /// Ranked full-text search over message content with boundary
    /// snippets. The query string must already be FTS-safe (the handler
    /// doubles inner quotes and wraps the whole term).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn search(
        &self,
        fts_query: &str,
        session: Option<&str>,
        role: Option<MessageRole>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<SearchHit>, i64)> {
        let mut conditions = vec!["messages_fts MATCH ?"];
        if session.is_some() {
            conditions.push("m.session_name = ?");
        }
        if role.is_some() {
            conditions.push("m.role = ?");
        }
        let where_sql = conditions.join(" AND ");

        let sql = format!(
            "SELECT m.id, m.session_name, m.role, m.content, m.timestamp,
                    snippet(messages_fts, 0, '<mark>', '</mark>', '...', 40) AS snippet
             FROM messages m
             JOIN messages_fts ON m.id = messages_fts.rowid
             WHERE {where_sql}
             ORDER BY rank
             LIMIT ? OFFSET ?"
        );
        let mut query = sqlx::query(&sql).bind(fts_query);
        if let Some(name) = session {
            query = query.bind(name);
        }
        if let Some(r) = role {
            query = query.bind(r.as_str());
        }
        let rows = query
            .bind(limit)
            .bind(offset)
            .fetch_all(self.db.as_ref())
            .await?;

        let hits = rows
            .into_iter()
            .map(|row| SearchHit {
                id: row.get("id"),
                session_name: row.get("session_name"),
                role: row.get("role"),
                content: row.get("content"),
                timestamp: row.get("timestamp"),
                snippet: row.get("snippet"),
            })
            .collect();

        let count_sql = format!(
            "SELECT COUNT(*) AS cnt
             FROM messages m
             JOIN messages_fts ON m.id = messages_fts.rowid
             WHERE {where_sql}"
        );
        let mut count_query = sqlx::query(&count_sql).bind(fts_query);
        if let Some(name) = session {
            count_query = count_query.bind(name);
        }
        if let Some(r) = role {
            count_query = count_query.bind(r.as_str());
        }
        let total: i64 = count_query.fetch_one(self.db.as_ref()).await?.get("cnt");

        Ok((hits, total))
    }
}
