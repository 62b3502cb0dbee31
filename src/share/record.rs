//! Share records and their local store.

use serde::{Deserialize, Serialize};

use crate::persistence::record_repo::RecordRepo;
use crate::Result;

/// Record key prefix for share records.
pub const SHARE_KEY: &str = "session_share";

/// Remote identity issued when a session is shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    /// Share id on the remote endpoint.
    pub id: String,
    /// Bearer credential scoped to this share.
    pub secret: String,
    /// Public URL of the share.
    pub url: String,
}

/// Share records persisted per session.
#[derive(Debug, Clone)]
pub struct ShareStore {
    repo: RecordRepo,
}

impl ShareStore {
    /// Store backed by `repo`.
    #[must_use]
    pub fn new(repo: RecordRepo) -> Self {
        Self { repo }
    }

    /// The record for `session_id`, if the session is shared.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the lookup fails.
    pub async fn get(&self, session_id: &str) -> Result<Option<ShareRecord>> {
        self.repo.read(&[SHARE_KEY, session_id]).await
    }

    /// Persist the record for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn put(&self, session_id: &str, record: &ShareRecord) -> Result<()> {
        self.repo.write(&[SHARE_KEY, session_id], record).await
    }

    /// Forget the record for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.repo.remove(&[SHARE_KEY, session_id]).await
    }

    /// Ids of every shared session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the listing fails.
    pub async fn shared_sessions(&self) -> Result<Vec<String>> {
        Ok(self
            .repo
            .list(&[SHARE_KEY])
            .await?
            .into_iter()
            .filter_map(|mut key| key.pop())
            .collect())
    }
}
