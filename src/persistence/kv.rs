//! Typed scalar key/value store.
//!
//! Key families: `pref:` for user preferences, `setting:` for
//! administrator settings, `transcript_offset:` for per-session tail
//! high-watermarks.

use std::sync::Arc;

use chrono::Utc;
use sqlx::Row;

use crate::Result;

use super::db::Database;

/// Repository wrapper around the `kv` table.
#[derive(Clone)]
pub struct Kv {
    db: Arc<Database>,
}

impl Kv {
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Read a value by exact key.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(self.db.as_ref())
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    /// Upsert a value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO kv (key, value, updated) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated = ?3",
        )
        .bind(key)
        .bind(value)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// All (key, value) pairs under a key-family prefix, with the prefix
    /// stripped from the returned keys.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, value FROM kv WHERE key LIKE ?1")
            .bind(format!("{prefix}%"))
            .fetch_all(self.db.as_ref())
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let key: String = row.get("key");
                let stripped = key.strip_prefix(prefix).unwrap_or(&key).to_owned();
                (stripped, row.get("value"))
            })
            .collect())
    }
}
