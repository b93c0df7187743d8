//! Append-only audit log of selected lifecycle events.
//!
//! Separate from the in-memory event bus; this table exists for offline
//! analysis and survives restarts.

use std::sync::Arc;

use chrono::Utc;
use sqlx::Row;

use crate::Result;

use super::db::Database;

/// Repository wrapper around the `events` table.
#[derive(Clone)]
pub struct EventRepo {
    db: Arc<Database>,
}

/// A stored audit row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEvent {
    pub id: i64,
    pub event_type: String,
    pub session_name: Option<String>,
    pub payload: String,
    pub created_at: String,
}

impl EventRepo {
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append an audit row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn append(
        &self,
        event_type: &str,
        session_name: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO events (event_type, session_name, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(event_type)
        .bind(session_name)
        .bind(payload.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Most recent audit rows, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            "SELECT id, event_type, session_name, payload, created_at
             FROM events ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.db.as_ref())
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| AuditEvent {
                id: row.get("id"),
                event_type: row.get("event_type"),
                session_name: row.get("session_name"),
                payload: row.get("payload"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
