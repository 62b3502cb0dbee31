//! Share lifecycle and change-event routing.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use super::client::ShareTransport;
use super::data::{Data, FileDiff, MessageInfo, ModelInfo, PartInfo, Role, SessionInfo};
use super::queue::SyncQueue;
use super::record::{ShareRecord, ShareStore};
use super::source::SessionSource;
use crate::{AppError, Result};

/// Local change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Session record changed.
    SessionUpdated(SessionInfo),
    /// Message record changed.
    MessageUpdated(MessageInfo),
    /// Message part changed.
    PartUpdated(PartInfo),
    /// Session diff list recomputed.
    SessionDiff {
        /// Session the diff belongs to.
        session_id: String,
        /// Full diff list.
        diff: Vec<FileDiff>,
    },
}

impl SessionEvent {
    /// Session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionUpdated(info) => &info.id,
            Self::MessageUpdated(info) => &info.session_id,
            Self::PartUpdated(part) => &part.session_id,
            Self::SessionDiff { session_id, .. } => session_id,
        }
    }
}

/// Creates, removes and keeps shares in sync.
#[derive(Clone)]
pub struct ShareService {
    transport: Arc<dyn ShareTransport>,
    store: ShareStore,
    source: Arc<dyn SessionSource>,
    queue: SyncQueue,
    background: TaskTracker,
}

impl ShareService {
    /// Service syncing through `queue`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn ShareTransport>,
        store: ShareStore,
        source: Arc<dyn SessionSource>,
        queue: SyncQueue,
    ) -> Self {
        Self {
            transport,
            store,
            source,
            queue,
            background: TaskTracker::new(),
        }
    }

    /// The underlying sync queue.
    #[must_use]
    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Share record of `session_id`, if shared.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the lookup fails.
    pub async fn get(&self, session_id: &str) -> Result<Option<ShareRecord>> {
        self.store.get(session_id).await
    }

    /// Share `session_id` remotely and start a full resync in the background.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Share` if the endpoint rejects the request, or
    /// `AppError::Db` if the record cannot be stored.
    pub async fn create(&self, session_id: &str) -> Result<ShareRecord> {
        info!(session_id, "creating share");
        let record = self.transport.create(session_id).await?;
        self.store.put(session_id, &record).await?;

        let this = self.clone();
        let session = session_id.to_owned();
        self.background.spawn(
            async move {
                if let Err(err) = this.full_sync(&session).await {
                    warn!(%err, "initial full sync failed");
                }
            }
            .instrument(info_span!("full_sync", session_id)),
        );
        Ok(record)
    }

    /// Unshare `session_id`. Does nothing if the session is not shared.
    ///
    /// Pending batches are left alone; their flush finds no record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Share` if the remote delete fails (the local
    /// record is kept), or `AppError::Db` on store failure.
    pub async fn remove(&self, session_id: &str) -> Result<()> {
        info!(session_id, "removing share");
        let Some(record) = self.store.get(session_id).await? else {
            return Ok(());
        };
        self.transport.remove(&record).await?;
        self.store.delete(session_id).await
    }

    /// Remote state of the share of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not shared, or
    /// `AppError::Share` if the fetch fails.
    pub async fn fetch(&self, session_id: &str) -> Result<Vec<Data>> {
        let record = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} is not shared")))?;
        self.transport.fetch(&record.id).await
    }

    /// Queue the complete local state of `session_id` as one batch.
    ///
    /// Models that cannot be resolved are skipped.
    ///
    /// # Errors
    ///
    /// Returns the source error if the session, diffs or messages cannot
    /// be read.
    pub async fn full_sync(&self, session_id: &str) -> Result<()> {
        info!(session_id, "full sync");
        let session = self.source.session(session_id).await?;
        let diffs = self.source.diffs(session_id).await?;
        let messages = self.source.messages(session_id).await?;

        let mut seen = HashSet::new();
        let mut models = Vec::new();
        for message in &messages {
            if let Some(model) = user_model(&message.info) {
                if seen.insert(model) {
                    if let Some(info) = self.resolve_model(&message.info).await {
                        models.push(info);
                    }
                }
            }
        }

        let mut items = Vec::with_capacity(messages.len() * 2 + 3);
        items.push(Data::Session(session));
        items.extend(messages.iter().map(|m| Data::Message(m.info.clone())));
        items.extend(
            messages
                .into_iter()
                .flat_map(|m| m.parts.into_iter().map(Data::Part)),
        );
        items.push(Data::SessionDiff(diffs));
        items.push(Data::Model(models));

        debug!(session_id, items = items.len(), "queueing full state");
        self.queue.enqueue(session_id, items).await;
        Ok(())
    }

    /// Route one change event into the sync queue.
    ///
    /// A user message also queues the model it references.
    pub async fn handle_event(&self, event: SessionEvent) {
        let session_id = event.session_id().to_owned();
        match event {
            SessionEvent::SessionUpdated(info) => {
                self.queue.push(&session_id, Data::Session(info)).await;
            }
            SessionEvent::MessageUpdated(info) => {
                let model = self.resolve_model(&info).await;
                self.queue.push(&session_id, Data::Message(info)).await;
                if let Some(model) = model {
                    self.queue.push(&session_id, Data::Model(vec![model])).await;
                }
            }
            SessionEvent::PartUpdated(part) => {
                self.queue.push(&session_id, Data::Part(part)).await;
            }
            SessionEvent::SessionDiff { diff, .. } => {
                self.queue.push(&session_id, Data::SessionDiff(diff)).await;
            }
        }
    }

    /// Consume events from `rx` until it closes or `cancel` fires.
    #[must_use]
    pub fn spawn_event_loop(
        &self,
        mut rx: mpsc::Receiver<SessionEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(
            async move {
                loop {
                    let event = tokio::select! {
                        () = cancel.cancelled() => {
                            info!("share event loop shutting down");
                            break;
                        }
                        maybe_event = rx.recv() => {
                            if let Some(e) = maybe_event { e } else {
                                info!("share event channel closed");
                                break;
                            }
                        }
                    };
                    this.handle_event(event).await;
                }
            }
            .instrument(info_span!("share_events")),
        )
    }

    /// Wait for background resyncs, then flush every pending batch.
    pub async fn shutdown(&self) {
        self.background.close();
        self.background.wait().await;
        self.queue.shutdown().await;
    }

    async fn resolve_model(&self, info: &MessageInfo) -> Option<ModelInfo> {
        let model = user_model(info)?;
        match self.source.model(&model.0, &model.1).await {
            Ok(found) => Some(found),
            Err(err) => {
                warn!(%err, provider_id = model.0, model_id = model.1, "model lookup failed");
                None
            }
        }
    }
}

fn user_model(info: &MessageInfo) -> Option<(String, String)> {
    if info.role != Role::User {
        return None;
    }
    info.model
        .as_ref()
        .map(|m| (m.provider_id.clone(), m.model_id.clone()))
}
