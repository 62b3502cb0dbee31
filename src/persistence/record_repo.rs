//! Key-path record store.
//!
//! Values are JSON documents addressed by a path of segments, for example
//! `["session_share", "ses_123"]`. Paths are stored joined with `/`, so a
//! segment must not itself contain `/`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for key-path records.
#[derive(Debug, Clone)]
pub struct RecordRepo {
    db: Arc<Database>,
}

impl RecordRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Read and deserialise the record at `key`.
    ///
    /// Returns `Ok(None)` if no record exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the key is invalid, the query fails, or
    /// the stored JSON does not match `T`.
    pub async fn read<T: DeserializeOwned>(&self, key: &[&str]) -> Result<Option<T>> {
        let key = join_key(key)?;
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM record WHERE key = ?1")
            .bind(&key)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(|(value,)| {
            serde_json::from_str(&value)
                .map_err(|e| AppError::Db(format!("corrupt record {key}: {e}")))
        })
        .transpose()
    }

    /// Insert or replace the record at `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the key is invalid, `value` cannot be
    /// serialised, or the write fails.
    pub async fn write<T: Serialize + ?Sized>(&self, key: &[&str], value: &T) -> Result<()> {
        let key = join_key(key)?;
        let value = serde_json::to_string(value)
            .map_err(|e| AppError::Db(format!("failed to serialise record {key}: {e}")))?;

        sqlx::query(
            "INSERT INTO record (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(&key)
        .bind(&value)
        .bind(now_millis())
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Delete the record at `key`. Deleting a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the key is invalid or the delete fails.
    pub async fn remove(&self, key: &[&str]) -> Result<()> {
        let key = join_key(key)?;
        sqlx::query("DELETE FROM record WHERE key = ?1")
            .bind(&key)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Keys directly or indirectly below `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the prefix is invalid or the query fails.
    pub async fn list(&self, prefix: &[&str]) -> Result<Vec<Vec<String>>> {
        let prefix = format!("{}/", join_key(prefix)?);
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT key FROM record WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
                .bind(&prefix)
                .fetch_all(self.db.as_ref())
                .await?;

        Ok(rows
            .into_iter()
            .map(|(key,)| key.split('/').map(str::to_owned).collect())
            .collect())
    }
}

fn join_key(key: &[&str]) -> Result<String> {
    if key.is_empty() {
        return Err(AppError::Db("record key must not be empty".into()));
    }
    if let Some(bad) = key.iter().find(|s| s.is_empty() || s.contains('/')) {
        return Err(AppError::Db(format!("invalid record key segment: {bad:?}")));
    }
    Ok(key.join("/"))
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
