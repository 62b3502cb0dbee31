//! Calling side of an RPC channel.
//!
//! [`RpcClient::connect`] spawns a dispatch task that routes `rpc.result`
//! frames to the matching pending call and `rpc.event` frames to listeners.
//! Ids are per-client, monotonic from 0. The first result for an id wins;
//! later duplicates are dropped.
//!
//! Calls have no deadline of their own; [`RpcClient::call_timeout`] layers
//! one on top. When the channel closes, every pending call resolves with
//! `AppError::Channel("channel closed")`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};

use super::envelope::Envelope;
use super::listeners::{Listeners, Subscription};
use super::server::Emitter;
use crate::channel::{ChannelSender, MessageChannel};
use crate::{AppError, Result};

/// Map of in-flight call resolvers keyed by request id.
type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

struct ClientInner {
    sender: ChannelSender,
    next_id: AtomicU64,
    pending: PendingCalls,
    closed: AtomicBool,
    listeners: Listeners,
}

/// Cloneable handle for issuing calls over one channel.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("next_id", &self.inner.next_id.load(Ordering::Relaxed))
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Attach a client to `channel` and start its dispatch task.
    ///
    /// The task ends when the peer closes the channel.
    #[must_use]
    pub fn connect(channel: MessageChannel) -> (Self, JoinHandle<()>) {
        let (sender, inbound) = channel.into_parts();
        let inner = Arc::new(ClientInner {
            sender,
            next_id: AtomicU64::new(0),
            pending: PendingCalls::default(),
            closed: AtomicBool::new(false),
            listeners: Listeners::default(),
        });

        let span = info_span!("rpc_client");
        let task = tokio::spawn(dispatch(inbound, Arc::clone(&inner)).instrument(span));

        (Self { inner }, task)
    }

    /// Call `method` and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` if the channel is (or becomes) closed
    /// before a result arrives.
    pub async fn call(&self, method: &str, input: Value) -> Result<Value> {
        let (_, rx) = self.start_call(method, input).await?;
        rx.await
            .map_err(|_| AppError::Channel("channel closed".into()))
    }

    /// Call with typed input and output.
    ///
    /// # Errors
    ///
    /// As [`Self::call`], plus `AppError::Rpc` if the input cannot be
    /// serialised or the result does not deserialise into `O`.
    pub async fn call_as<I, O>(&self, method: &str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let input = serde_json::to_value(input)
            .map_err(|e| AppError::Rpc(format!("invalid input for {method}: {e}")))?;
        let result = self.call(method, input).await?;
        serde_json::from_value(result)
            .map_err(|e| AppError::Rpc(format!("unexpected result from {method}: {e}")))
    }

    /// Call with a deadline. On expiry the pending entry is discarded, so a
    /// late result is dropped like a duplicate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rpc` on timeout and `AppError::Channel` if the
    /// channel closes first.
    pub async fn call_timeout(&self, method: &str, input: Value, timeout: Duration) -> Result<Value> {
        let (id, rx) = self.start_call(method, input).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(AppError::Channel("channel closed".into())),
            Err(_elapsed) => {
                self.inner.pending.lock().await.remove(&id);
                warn!(id, method, ?timeout, "rpc call timed out");
                Err(AppError::Rpc(format!("{method} (id {id}) timed out after {timeout:?}")))
            }
        }
    }

    /// Listen for events pushed by the peer.
    pub fn on(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        self.inner.listeners.add(event, handler)
    }

    /// Push an event to the peer.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit`].
    pub async fn emit<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> Result<()> {
        Emitter::from_sender(self.inner.sender.clone())
            .emit(event, data)
            .await
    }

    /// Number of calls still awaiting a result.
    pub async fn pending_calls(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Whether the dispatch task has observed the channel closing.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    async fn start_call(&self, method: &str, input: Value) -> Result<(u64, oneshot::Receiver<Value>)> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock().await;
            // Checked under the lock so a concurrent close cannot miss this entry.
            if self.is_closed() {
                return Err(AppError::Channel("channel closed".into()));
            }
            pending.insert(id, tx);
        }

        let frame = Envelope::Request {
            id,
            method: method.to_owned(),
            input,
        }
        .encode()?;

        if let Err(err) = self.inner.sender.send(frame).await {
            self.inner.pending.lock().await.remove(&id);
            return Err(err);
        }

        debug!(id, method, "rpc call sent");
        Ok((id, rx))
    }
}

async fn dispatch(mut inbound: mpsc::Receiver<String>, inner: Arc<ClientInner>) {
    while let Some(frame) = inbound.recv().await {
        match Envelope::decode(&frame) {
            Err(err) => {
                warn!(error = %err, "rpc client: dropping malformed frame");
            }
            Ok(Envelope::Result { id, result }) => {
                let resolver = inner.pending.lock().await.remove(&id);
                match resolver {
                    Some(tx) => {
                        // The caller may have given up; nothing to do then.
                        let _ = tx.send(result);
                    }
                    None => debug!(id, "rpc client: result for unknown or resolved call"),
                }
            }
            Ok(Envelope::Event { event, data }) => {
                let delivered = inner.listeners.dispatch(&event, &data);
                debug!(event, delivered, "rpc client: event dispatched");
            }
            Ok(Envelope::Request { id, method, .. }) => {
                debug!(id, method, "rpc client: ignoring request, client serves no methods");
            }
        }
    }

    inner.closed.store(true, Ordering::SeqCst);
    let orphaned = {
        let mut pending = inner.pending.lock().await;
        let count = pending.len();
        pending.clear();
        count
    };
    debug!(orphaned, "rpc client: channel closed");
}
