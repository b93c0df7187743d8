//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::models::session::{AgentKind, Session, SessionStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    name: String,
    host: Option<String>,
    status: String,
    agent_type: Option<String>,
    working_dir: Option<String>,
    created_at: String,
    updated_at: String,
    closed_at: Option<String>,
    discord_thread_id: Option<String>,
    discord_archived: i64,
    slack_thread_ts: Option<String>,
    slack_channel_id: Option<String>,
    slack_archived: i64,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid session status: {}", self.status)))?;
        Ok(Session {
            name: self.name,
            host: self.host,
            status,
            agent_type: self.agent_type.as_deref().map(AgentKind::parse),
            working_dir: self.working_dir,
            created_at: parse_ts(&self.created_at, "created_at")?,
            updated_at: parse_ts(&self.updated_at, "updated_at")?,
            closed_at: self
                .closed_at
                .as_deref()
                .map(|s| parse_ts(s, "closed_at"))
                .transpose()?,
            discord_thread_id: self.discord_thread_id,
            discord_archived: self.discord_archived != 0,
            slack_thread_ts: self.slack_thread_ts,
            slack_channel_id: self.slack_channel_id,
            slack_archived: self.slack_archived != 0,
        })
    }
}

fn parse_ts(s: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

/// Fields accepted by the filtered list query. User-supplied sort names
/// are validated against this set before reaching the SQL text.
pub const SORT_FIELDS: [&str; 5] = ["name", "created_at", "updated_at", "status", "host"];

/// Filter/sort/pagination parameters for session listing.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub host: Option<String>,
    /// Substring match on the session name.
    pub name_contains: Option<String>,
    /// Sort field, optionally prefixed with `-` for descending.
    pub sort: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record. Insert-or-ignore: re-inserting an
    /// existing name is a no-op returning `false`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn insert(&self, session: &Session) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO sessions (name, host, status, agent_type, working_dir,
             created_at, updated_at, closed_at, discord_thread_id, discord_archived,
             slack_thread_ts, slack_channel_id, slack_archived)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&session.name)
        .bind(&session.host)
        .bind(session.status.as_str())
        .bind(session.agent_type.map(AgentKind::as_str))
        .bind(&session.working_dir)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(session.closed_at.map(|dt| dt.to_rfc3339()))
        .bind(&session.discord_thread_id)
        .bind(i64::from(session.discord_archived))
        .bind(&session.slack_thread_ts)
        .bind(&session.slack_channel_id)
        .bind(i64::from(session.slack_archived))
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Retrieve a session by name. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, name: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE name = ?1")
            .bind(name)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// List sessions matching a filter, newest-updated first by default.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self, filter: &SessionFilter) -> Result<(Vec<Session>, i64)> {
        let mut where_clauses: Vec<&str> = Vec::new();
        if filter.status.is_some() {
            where_clauses.push("status = ?");
        }
        if filter.host.is_some() {
            where_clauses.push("host = ?");
        }
        if filter.name_contains.is_some() {
            where_clauses.push("name LIKE ?");
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        // Sort field is validated against the allow-list before it reaches
        // the SQL text; unknown fields fall back to updated_at.
        let raw_sort = filter.sort.as_deref().unwrap_or("-updated_at");
        let descending = raw_sort.starts_with('-');
        let field = raw_sort.trim_start_matches('-');
        let field = if SORT_FIELDS.contains(&field) {
            field
        } else {
            "updated_at"
        };
        let direction = if descending { "DESC" } else { "ASC" };

        let count_sql = format!("SELECT COUNT(*) AS cnt FROM sessions {where_sql}");
        let mut count_query = sqlx::query(&count_sql);
        if let Some(status) = filter.status {
            count_query = count_query.bind(status.as_str());
        }
        if let Some(ref host) = filter.host {
            count_query = count_query.bind(host);
        }
        if let Some(ref q) = filter.name_contains {
            count_query = count_query.bind(format!("%{q}%"));
        }
        let total: i64 = count_query.fetch_one(self.db.as_ref()).await?.get("cnt");

        let list_sql = format!(
            "SELECT * FROM sessions {where_sql} ORDER BY {field} {direction} LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query_as::<_, SessionRow>(&list_sql);
        if let Some(status) = filter.status {
            list_query = list_query.bind(status.as_str());
        }
        if let Some(ref host) = filter.host {
            list_query = list_query.bind(host);
        }
        if let Some(ref q) = filter.name_contains {
            list_query = list_query.bind(format!("%{q}%"));
        }
        let rows = list_query
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(self.db.as_ref())
            .await?;

        let sessions = rows
            .into_iter()
            .map(SessionRow::into_session)
            .collect::<Result<Vec<_>>>()?;
        Ok((sessions, total))
    }

    /// List all sessions whose status is not `closed`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_open(&self) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM sessions WHERE status != 'closed'")
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// List active sessions holding the given platform anchor column.
    ///
    /// `anchor` must be one of the fixed thread-anchor column names; it is
    /// interpolated from compile-time constants only.
    async fn list_active_with_anchor(&self, anchor: &'static str) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT * FROM sessions
             WHERE status = 'active' AND {anchor} IS NOT NULL AND {anchor} != ''"
        );
        let rows: Vec<SessionRow> = sqlx::query_as(&sql).fetch_all(self.db.as_ref()).await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Active sessions with a Discord thread anchor.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_active_discord(&self) -> Result<Vec<Session>> {
        self.list_active_with_anchor("discord_thread_id").await
    }

    /// Active sessions with a Slack thread anchor.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_active_slack(&self) -> Result<Vec<Session>> {
        self.list_active_with_anchor("slack_thread_ts").await
    }

    /// Update status with the reconciler's transition guard, bumping
    /// `updated_at` and setting `closed_at` on closure.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is absent and
    /// `AppError::Db` on an invalid transition or query failure.
    pub async fn transition_status(&self, name: &str, next: SessionStatus) -> Result<Session> {
        let current = self
            .get(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session '{name}' not found")))?;

        if current.status == next {
            return Ok(current);
        }
        if !current.status.reconciler_may_transition(next) {
            return Err(AppError::Db(format!(
                "invalid status transition: {} -> {}",
                current.status.as_str(),
                next.as_str()
            )));
        }

        let now = Utc::now().to_rfc3339();
        if next == SessionStatus::Closed {
            sqlx::query(
                "UPDATE sessions SET status = ?1, closed_at = ?2, updated_at = ?2 WHERE name = ?3",
            )
            .bind(next.as_str())
            .bind(&now)
            .bind(name)
            .execute(self.db.as_ref())
            .await?;
        } else {
            sqlx::query("UPDATE sessions SET status = ?1, updated_at = ?2 WHERE name = ?3")
                .bind(next.as_str())
                .bind(&now)
                .bind(name)
                .execute(self.db.as_ref())
                .await?;
        }

        self.get(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session '{name}' gone after update")))
    }

    /// Force a status value without the reconciler guard. Used by API
    /// clients that own the orphan/unreachable states.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_status(&self, name: &str, status: SessionStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        if status == SessionStatus::Closed {
            sqlx::query(
                "UPDATE sessions SET status = ?1, closed_at = ?2, updated_at = ?2 WHERE name = ?3",
            )
            .bind(status.as_str())
            .bind(&now)
            .bind(name)
            .execute(self.db.as_ref())
            .await?;
        } else {
            sqlx::query("UPDATE sessions SET status = ?1, updated_at = ?2 WHERE name = ?3")
                .bind(status.as_str())
                .bind(&now)
                .bind(name)
                .execute(self.db.as_ref())
                .await?;
        }
        Ok(())
    }

    /// Update the owning host, bumping `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_host(&self, name: &str, host: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET host = ?1, updated_at = ?2 WHERE name = ?3")
            .bind(host)
            .bind(Utc::now().to_rfc3339())
            .bind(name)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Bump `updated_at` only.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn touch(&self, name: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET updated_at = ?1 WHERE name = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(name)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Update session metadata fields. `None` leaves a field unchanged.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn patch(
        &self,
        name: &str,
        agent_type: Option<AgentKind>,
        working_dir: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        if let Some(agent) = agent_type {
            sqlx::query("UPDATE sessions SET agent_type = ?1, updated_at = ?2 WHERE name = ?3")
                .bind(agent.as_str())
                .bind(&now)
                .bind(name)
                .execute(self.db.as_ref())
                .await?;
        }
        if let Some(dir) = working_dir {
            sqlx::query("UPDATE sessions SET working_dir = ?1, updated_at = ?2 WHERE name = ?3")
                .bind(dir)
                .bind(&now)
                .bind(name)
                .execute(self.db.as_ref())
                .await?;
        }
        Ok(())
    }

    /// Record the working directory without bumping anything else.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_working_dir(&self, name: &str, working_dir: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET working_dir = ?1 WHERE name = ?2")
            .bind(working_dir)
            .bind(name)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Store discovered platform thread anchors. `None` values are left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if an update fails.
    pub async fn set_thread_anchors(
        &self,
        name: &str,
        discord_thread_id: Option<&str>,
        slack_thread_ts: Option<&str>,
        slack_channel_id: Option<&str>,
    ) -> Result<()> {
        if let Some(id) = discord_thread_id {
            sqlx::query("UPDATE sessions SET discord_thread_id = ?1 WHERE name = ?2")
                .bind(id)
                .bind(name)
                .execute(self.db.as_ref())
                .await?;
        }
        if let Some(ts) = slack_thread_ts {
            sqlx::query("UPDATE sessions SET slack_thread_ts = ?1 WHERE name = ?2")
                .bind(ts)
                .bind(name)
                .execute(self.db.as_ref())
                .await?;
        }
        if let Some(channel) = slack_channel_id {
            sqlx::query("UPDATE sessions SET slack_channel_id = ?1 WHERE name = ?2")
                .bind(channel)
                .bind(name)
                .execute(self.db.as_ref())
                .await?;
        }
        Ok(())
    }

    /// Mark a platform thread archived.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_archived(&self, name: &str, platform: &str) -> Result<()> {
        let column = match platform {
            "discord" => "discord_archived",
            "slack" => "slack_archived",
            other => {
                return Err(AppError::InvalidInput(format!(
                    "unknown platform '{other}'"
                )))
            }
        };
        let sql = format!("UPDATE sessions SET {column} = 1 WHERE name = ?1");
        sqlx::query(&sql).bind(name).execute(self.db.as_ref()).await?;
        Ok(())
    }

    /// Delete a session row outright. Used by bulk delete.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE name = ?1")
            .bind(name)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count sessions per status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS cnt FROM sessions GROUP BY status")
            .fetch_all(self.db.as_ref())
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("status"), row.get("cnt")))
            .collect())
    }

    /// Distinct hosts with at least one active session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn active_hosts(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT host FROM sessions WHERE status = 'active' AND host IS NOT NULL",
        )
        .fetch_all(self.db.as_ref())
        .await?;
        Ok(rows.into_iter().map(|row| row.get("host")).collect())
    }
}
