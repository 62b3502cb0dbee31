//! Session sharing.
//!
//! Local change events are batched per session by [`SyncQueue`] and pushed
//! to the remote share endpoint through a [`ShareTransport`].
//! [`ShareService`] owns the share lifecycle (create, remove, fetch, full
//! resync) and routes [`SessionEvent`]s into the queue.

pub mod client;
pub mod data;
pub mod queue;
pub mod record;
pub mod service;
pub mod source;

pub use client::{HttpShareClient, ShareFuture, ShareTransport};
pub use data::Data;
pub use queue::{SyncBatch, SyncQueue, DEFAULT_DEBOUNCE};
pub use record::{ShareRecord, ShareStore};
pub use service::{SessionEvent, ShareService};
pub use source::{MessageWithParts, RecordSessionSource, SessionSource};
