//! Wire envelope for RPC frames.
//!
//! One JSON object per frame, discriminated by `type`:
//!
//! ```json
//! {"type":"rpc.request","id":0,"method":"ping","input":{}}
//! {"type":"rpc.result","id":0,"result":"pong"}
//! {"type":"rpc.event","event":"ready","data":null}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// A single RPC frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Caller → callee: invoke `method` with `input`.
    #[serde(rename = "rpc.request")]
    Request {
        /// Caller-assigned correlation id.
        id: u64,
        /// Method name.
        method: String,
        /// Method input; `null` when omitted.
        #[serde(default)]
        input: Value,
    },
    /// Callee → caller: result for request `id`.
    #[serde(rename = "rpc.result")]
    Result {
        /// Echo of the request id.
        id: u64,
        /// Handler result; `null` when omitted.
        #[serde(default)]
        result: Value,
    },
    /// Either direction: fire-and-forget notification.
    #[serde(rename = "rpc.event")]
    Event {
        /// Event name.
        event: String,
        /// Event payload; `null` when omitted.
        #[serde(default)]
        data: Value,
    },
}

impl Envelope {
    /// Serialise to a single-line JSON frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` if the payload cannot be serialised.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(AppError::from)
    }

    /// Parse one frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel("malformed json: …")` for anything that is
    /// not a known envelope.
    pub fn decode(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(AppError::from)
    }
}
