//! Read access to local session state, used by full resyncs.
//!
//! [`RecordSessionSource`] serves the state from the key-path record store:
//!
//! | Key                                   | Value            |
//! |---------------------------------------|------------------|
//! | `["session", session_id]`             | `SessionInfo`    |
//! | `["session_diff", session_id]`        | `Vec<FileDiff>`  |
//! | `["message", session_id, message_id]` | `MessageInfo`    |
//! | `["part", message_id, part_id]`       | `PartInfo`       |
//! | `["model", provider_id, model_id]`    | `ModelInfo`      |

use super::client::ShareFuture;
use super::data::{FileDiff, MessageInfo, ModelInfo, PartInfo, SessionInfo};
use crate::persistence::record_repo::RecordRepo;
use crate::{AppError, Result};

/// A message together with its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageWithParts {
    /// Message record.
    pub info: MessageInfo,
    /// Parts of the message, in order.
    pub parts: Vec<PartInfo>,
}

/// Local session state provider.
pub trait SessionSource: Send + Sync {
    /// The session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions.
    fn session(&self, session_id: &str) -> ShareFuture<'_, SessionInfo>;

    /// Current file diffs of the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the diffs cannot be read.
    fn diffs(&self, session_id: &str) -> ShareFuture<'_, Vec<FileDiff>>;

    /// Every message of the session with its parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the messages cannot be read.
    fn messages(&self, session_id: &str) -> ShareFuture<'_, Vec<MessageWithParts>>;

    /// Model metadata for a provider/model pair.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the model is unknown.
    fn model(&self, provider_id: &str, model_id: &str) -> ShareFuture<'_, ModelInfo>;
}

/// [`SessionSource`] over the local record store.
#[derive(Debug, Clone)]
pub struct RecordSessionSource {
    repo: RecordRepo,
}

impl RecordSessionSource {
    /// Source reading from `repo`.
    #[must_use]
    pub fn new(repo: RecordRepo) -> Self {
        Self { repo }
    }

    /// Store a session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn put_session(&self, info: &SessionInfo) -> Result<()> {
        self.repo.write(&["session", &info.id], info).await
    }

    /// Store the diff list of a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn put_diffs(&self, session_id: &str, diffs: &[FileDiff]) -> Result<()> {
        self.repo.write(&["session_diff", session_id], diffs).await
    }

    /// Store a message record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn put_message(&self, info: &MessageInfo) -> Result<()> {
        self.repo
            .write(&["message", &info.session_id, &info.id], info)
            .await
    }

    /// Store a part record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn put_part(&self, part: &PartInfo) -> Result<()> {
        self.repo
            .write(&["part", &part.message_id, &part.id], part)
            .await
    }

    /// Store model metadata.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn put_model(&self, model: &ModelInfo) -> Result<()> {
        self.repo
            .write(&["model", &model.provider_id, &model.id], model)
            .await
    }

    async fn read_all<T: serde::de::DeserializeOwned>(&self, prefix: &[&str]) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for key in self.repo.list(prefix).await? {
            let key: Vec<&str> = key.iter().map(String::as_str).collect();
            if let Some(value) = self.repo.read(&key).await? {
                values.push(value);
            }
        }
        Ok(values)
    }
}

impl SessionSource for RecordSessionSource {
    fn session(&self, session_id: &str) -> ShareFuture<'_, SessionInfo> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            self.repo
                .read(&["session", &session_id])
                .await?
                .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))
        })
    }

    fn diffs(&self, session_id: &str) -> ShareFuture<'_, Vec<FileDiff>> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            Ok(self
                .repo
                .read(&["session_diff", &session_id])
                .await?
                .unwrap_or_default())
        })
    }

    fn messages(&self, session_id: &str) -> ShareFuture<'_, Vec<MessageWithParts>> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            let infos: Vec<MessageInfo> = self.read_all(&["message", &session_id]).await?;
            let mut messages = Vec::with_capacity(infos.len());
            for info in infos {
                let parts = self.read_all(&["part", &info.id]).await?;
                messages.push(MessageWithParts { info, parts });
            }
            Ok(messages)
        })
    }

    fn model(&self, provider_id: &str, model_id: &str) -> ShareFuture<'_, ModelInfo> {
        let provider_id = provider_id.to_owned();
        let model_id = model_id.to_owned();
        Box::pin(async move {
            self.repo
                .read(&["model", &provider_id, &model_id])
                .await?
                .ok_or_else(|| AppError::NotFound(format!("model {provider_id}/{model_id} not found")))
        })
    }
}
