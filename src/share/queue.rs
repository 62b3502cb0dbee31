//! Debounced, coalescing share sync queue.
//!
//! Change items for a session accumulate in a pending batch. The first item
//! of a batch arms a single flush timer; later items merge into the batch
//! without moving the deadline. When the timer fires the batch is taken out
//! of the pending map before any I/O, so items arriving during the POST
//! start a fresh batch.
//!
//! Flushing is best-effort. A missing share record drops the batch and a
//! failed POST is logged and forgotten; a later flush or a full resync
//! repairs the remote state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::client::ShareTransport;
use super::data::Data;
use super::record::ShareStore;

/// Default quiescence window before a batch is flushed.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Pending items for one session, last write wins per key.
///
/// Keys keep the position of their first insertion.
#[derive(Debug, Default)]
pub struct SyncBatch {
    items: Vec<Data>,
    index: HashMap<String, usize>,
}

impl SyncBatch {
    /// Insert `item`, replacing the pending value with the same key.
    ///
    /// Items without a stable id get a fresh key and never coalesce.
    pub fn insert(&mut self, item: Data) {
        let key = item
            .key()
            .unwrap_or_else(|| format!("{}:{}", item.kind(), Uuid::new_v4()));
        if let Some(&slot) = self.index.get(&key) {
            self.items[slot] = item;
        } else {
            self.index.insert(key, self.items.len());
            self.items.push(item);
        }
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in first-seen key order.
    #[must_use]
    pub fn into_items(self) -> Vec<Data> {
        self.items
    }
}

struct QueueInner {
    transport: Arc<dyn ShareTransport>,
    store: ShareStore,
    window: Duration,
    pending: Mutex<HashMap<String, SyncBatch>>,
    // Serialises flushes of one session so POSTs land in batch order.
    // Entries live only while a flush of that session is in progress.
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Per-session debounced sync queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<QueueInner>,
}

impl SyncQueue {
    /// Queue flushing through `transport` after `window` of quiescence.
    #[must_use]
    pub fn new(transport: Arc<dyn ShareTransport>, store: ShareStore, window: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                transport,
                store,
                window,
                pending: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Debounce window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Add `items` to the pending batch of `session_id`.
    ///
    /// Arms the flush timer only when no batch is pending.
    pub async fn enqueue(&self, session_id: &str, items: impl IntoIterator<Item = Data>) {
        let mut pending = self.inner.pending.lock().await;
        if let Some(batch) = pending.get_mut(session_id) {
            for item in items {
                batch.insert(item);
            }
            debug!(session_id, items = batch.len(), "merged into pending batch");
            return;
        }

        let mut batch = SyncBatch::default();
        for item in items {
            batch.insert(item);
        }
        debug!(session_id, items = batch.len(), "new sync batch");
        pending.insert(session_id.to_owned(), batch);
        drop(pending);

        self.arm(session_id.to_owned());
    }

    /// Add a single item. See [`enqueue`](Self::enqueue).
    pub async fn push(&self, session_id: &str, item: Data) {
        self.enqueue(session_id, [item]).await;
    }

    /// Sessions with a pending batch.
    pub async fn pending_sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = self.inner.pending.lock().await.keys().cloned().collect();
        sessions.sort();
        sessions
    }

    /// Number of pending items for `session_id`.
    pub async fn pending_len(&self, session_id: &str) -> usize {
        self.inner
            .pending
            .lock()
            .await
            .get(session_id)
            .map_or(0, SyncBatch::len)
    }

    /// Sessions with a flush in progress or waiting on another flush.
    pub async fn flushing_sessions(&self) -> usize {
        self.inner.gates.lock().await.len()
    }

    /// Flush every pending batch now and wait for all flushes to finish.
    ///
    /// Items enqueued afterwards are flushed immediately.
    pub async fn shutdown(&self) {
        info!("flushing pending share batches");
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    fn arm(&self, session_id: String) {
        let inner = Arc::clone(&self.inner);
        let span = info_span!("share_flush", session_id);
        self.inner.tracker.spawn(
            async move {
                tokio::select! {
                    () = tokio::time::sleep(inner.window) => {}
                    () = inner.cancel.cancelled() => {
                        debug!("flush forced by shutdown");
                    }
                }
                inner.flush(&session_id).await;
            }
            .instrument(span),
        );
    }
}

impl QueueInner {
    async fn flush(&self, session_id: &str) {
        let Some(batch) = self.pending.lock().await.remove(session_id) else {
            return;
        };

        let gate = Arc::clone(
            self.gates
                .lock()
                .await
                .entry(session_id.to_owned())
                .or_default(),
        );
        {
            let _in_flight = gate.lock().await;
            self.sync_batch(session_id, batch).await;
        }

        // Clones are only taken under the `gates` lock, so a count of two
        // (map plus this task) means no other flush is waiting.
        let mut gates = self.gates.lock().await;
        if Arc::strong_count(&gate) == 2 {
            gates.remove(session_id);
        }
    }

    async fn sync_batch(&self, session_id: &str, batch: SyncBatch) {
        let share = match self.store.get(session_id).await {
            Ok(Some(share)) => share,
            Ok(None) => {
                debug!(items = batch.len(), "session not shared, dropping batch");
                return;
            }
            Err(err) => {
                warn!(%err, items = batch.len(), "share record lookup failed, dropping batch");
                return;
            }
        };

        let items = batch.len();
        match self.transport.sync(&share, batch.into_items()).await {
            Ok(()) => info!(share_id = share.id, items, "share batch synced"),
            Err(err) => warn!(%err, share_id = share.id, items, "share sync failed"),
        }
    }
}
