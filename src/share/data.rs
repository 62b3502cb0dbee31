//! Sync payloads.
//!
//! [`Data`] is the tagged union sent to the share endpoint. On the wire
//! every item is `{"type": "<kind>", "data": <payload>}`. The payload
//! structs name the fields this crate reads and keep every other field in
//! `extra`, so records pass through unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id.
    pub id: String,
    /// Session title.
    #[serde(default)]
    pub title: String,
    /// Remaining session fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Human turn.
    User,
    /// Model turn.
    Assistant,
}

/// Provider/model pair referenced by a user message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    /// Provider id.
    #[serde(rename = "providerID")]
    pub provider_id: String,
    /// Model id.
    #[serde(rename = "modelID")]
    pub model_id: String,
}

/// Message record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    /// Message id.
    pub id: String,
    /// Owning session.
    #[serde(rename = "sessionID")]
    pub session_id: String,
    /// Author.
    pub role: Role,
    /// Model selection (user messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
    /// Remaining message fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Message part record (text chunk, tool call, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartInfo {
    /// Part id.
    pub id: String,
    /// Owning session.
    #[serde(rename = "sessionID")]
    pub session_id: String,
    /// Owning message.
    #[serde(rename = "messageID")]
    pub message_id: String,
    /// Remaining part fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-file change summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Path relative to the project root.
    pub file: String,
    /// Content before the change.
    #[serde(default)]
    pub before: String,
    /// Content after the change.
    #[serde(default)]
    pub after: String,
    /// Added lines.
    #[serde(default)]
    pub additions: u64,
    /// Removed lines.
    #[serde(default)]
    pub deletions: u64,
}

/// Provider model metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model id.
    pub id: String,
    /// Provider id.
    #[serde(rename = "providerID")]
    pub provider_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Remaining model fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One item of a sync batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Data {
    /// Session record.
    Session(SessionInfo),
    /// Message record.
    Message(MessageInfo),
    /// Message part.
    Part(PartInfo),
    /// Full diff list of the session.
    SessionDiff(Vec<FileDiff>),
    /// Models referenced by the session.
    Model(Vec<ModelInfo>),
}

impl Data {
    /// Wire name of this item's kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::Message(_) => "message",
            Self::Part(_) => "part",
            Self::SessionDiff(_) => "session_diff",
            Self::Model(_) => "model",
        }
    }

    /// Stable coalescing key, for kinds that carry an id.
    ///
    /// The kind is part of the key so records of different kinds never
    /// overwrite each other. Diff and model lists have no id.
    #[must_use]
    pub fn key(&self) -> Option<String> {
        let id = match self {
            Self::Session(info) => &info.id,
            Self::Message(info) => &info.id,
            Self::Part(info) => &info.id,
            Self::SessionDiff(_) | Self::Model(_) => return None,
        };
        Some(format!("{}:{id}", self.kind()))
    }
}
