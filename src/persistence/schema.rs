//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every server startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// Creates the six tables, the FTS5 index over message content, and the
/// triggers that keep the index coherent. Safe to call on every startup.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS sessions (
    name            TEXT PRIMARY KEY NOT NULL,
    host            TEXT,
    status          TEXT NOT NULL DEFAULT 'active'
                    CHECK(status IN ('active','idle','closed','orphan','unreachable')),
    agent_type      TEXT,
    working_dir     TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    closed_at       TEXT,
    discord_thread_id   TEXT,
    discord_archived    INTEGER NOT NULL DEFAULT 0,
    slack_thread_ts     TEXT,
    slack_channel_id    TEXT,
    slack_archived      INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
CREATE INDEX IF NOT EXISTS idx_sessions_status_updated ON sessions(status, updated_at);

CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    session_name    TEXT NOT NULL REFERENCES sessions(name),
    role            TEXT NOT NULL CHECK(role IN ('user','assistant','system')),
    content         TEXT NOT NULL,
    source          TEXT NOT NULL,
    source_id       TEXT,
    source_author   TEXT,
    timestamp       TEXT NOT NULL,
    ingested_at     TEXT NOT NULL,
    dedup_hash      TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_dedup ON messages(dedup_hash);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_name, timestamp);
CREATE INDEX IF NOT EXISTS idx_messages_session_source ON messages(session_name, source);

CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    content,
    session_name UNINDEXED,
    role UNINDEXED,
    content='messages',
    content_rowid='id'
);

CREATE TABLE IF NOT EXISTS events (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type      TEXT NOT NULL,
    session_name    TEXT,
    payload         TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);

CREATE TABLE IF NOT EXISTS kv (
    key     TEXT PRIMARY KEY NOT NULL,
    value   TEXT NOT NULL,
    updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS usage_snapshots (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    provider                    TEXT NOT NULL DEFAULT 'anthropic',
    polled_at                   TEXT NOT NULL,
    requests_limit              INTEGER,
    requests_remaining          INTEGER,
    requests_reset              TEXT,
    input_tokens_limit          INTEGER,
    input_tokens_remaining      INTEGER,
    input_tokens_reset          TEXT,
    output_tokens_limit         INTEGER,
    output_tokens_remaining     INTEGER,
    output_tokens_reset         TEXT,
    tokens_limit                INTEGER,
    tokens_remaining            INTEGER,
    tokens_reset                TEXT,
    poll_model                  TEXT,
    poll_status_code            INTEGER NOT NULL DEFAULT 0,
    error_message               TEXT
);

CREATE INDEX IF NOT EXISTS idx_usage_provider ON usage_snapshots(provider, polled_at);

CREATE TABLE IF NOT EXISTS command_queue (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    session_name    TEXT NOT NULL,
    host            TEXT NOT NULL,
    command         TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending'
                    CHECK(status IN ('pending','executing','completed','failed','cancelled')),
    priority        INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    executed_at     TEXT,
    error           TEXT
);

CREATE INDEX IF NOT EXISTS idx_cmdq_status ON command_queue(status);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    create_fts_triggers(pool).await?;
    Ok(())
}

/// Triggers keeping `messages_fts` coherent with the messages table.
async fn create_fts_triggers(pool: &SqlitePool) -> Result<()> {
    let triggers = [
        "CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
            INSERT INTO messages_fts(rowid, content, session_name, role)
            VALUES (new.id, new.content, new.session_name, new.role);
        END",
        "CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
            INSERT INTO messages_fts(messages_fts, rowid, content, session_name, role)
            VALUES ('delete', old.id, old.content, old.session_name, old.role);
        END",
        "CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE ON messages BEGIN
            INSERT INTO messages_fts(messages_fts, rowid, content, session_name, role)
            VALUES ('delete', old.id, old.content, old.session_name, old.role);
            INSERT INTO messages_fts(rowid, content, session_name, role)
            VALUES (new.id, new.content, new.session_name, new.role);
        END",
    ];

    for trigger in triggers {
        sqlx::raw_sql(trigger).execute(pool).await?;
    }
    Ok(())
}
