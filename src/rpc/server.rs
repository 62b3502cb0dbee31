//! Serving side of an RPC channel.
//!
//! [`RpcServer::listen`] runs a dispatch loop over one [`MessageChannel`]:
//! each `rpc.request` runs its handler on its own task and answers with an
//! `rpc.result` carrying the same id, so a slow handler never blocks the
//! others. Incoming `rpc.event` frames reach listeners registered with
//! [`RpcServer::on`].
//!
//! The channel is trusted, so an unknown method or a failing handler is a
//! programming error: the loop stops and returns the error instead of
//! answering.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info_span, warn, Instrument};

use super::envelope::Envelope;
use super::listeners::{Listeners, Subscription};
use crate::channel::{ChannelSender, MessageChannel};
use crate::{AppError, Result};

/// Boxed future returned by a method handler.
pub type MethodFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Type-erased method handler.
pub type Method = Arc<dyn Fn(Value) -> MethodFuture + Send + Sync>;

/// Mapping from method name to handler.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, Method>,
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("MethodTable").field("methods", &names).finish()
    }
}

impl MethodTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler working on raw JSON values.
    #[must_use]
    pub fn register<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.methods.insert(
            name.to_owned(),
            Arc::new(move |input| -> MethodFuture { Box::pin(handler(input)) }),
        );
        self
    }

    /// Register a handler with typed input and output.
    ///
    /// Input that does not deserialise into `I` fails the handler.
    #[must_use]
    pub fn register_typed<I, O, F, Fut>(self, name: &str, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let method = name.to_owned();
        self.register(name, move |input| {
            let handler = Arc::clone(&handler);
            let method = method.clone();
            async move {
                let input: I = serde_json::from_value(input)
                    .map_err(|e| AppError::Rpc(format!("invalid input for {method}: {e}")))?;
                let output = handler(input).await?;
                serde_json::to_value(output)
                    .map_err(|e| AppError::Rpc(format!("invalid output from {method}: {e}")))
            }
        })
    }

    /// Look up a handler.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }
}

/// Cloneable fire-and-forget event sender.
#[derive(Debug, Clone)]
pub struct Emitter {
    sender: ChannelSender,
}

impl Emitter {
    /// Emitter writing to `channel`'s outbound half.
    #[must_use]
    pub fn new(channel: &MessageChannel) -> Self {
        Self {
            sender: channel.sender(),
        }
    }

    pub(crate) fn from_sender(sender: ChannelSender) -> Self {
        Self { sender }
    }

    /// Send an `rpc.event` frame. No acknowledgement is expected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` if `data` cannot be serialised or the
    /// channel is closed.
    pub async fn emit<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> Result<()> {
        let frame = Envelope::Event {
            event: event.to_owned(),
            data: serde_json::to_value(data)?,
        }
        .encode()?;
        self.sender.send(frame).await
    }
}

/// Handle to a listening RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcServer {
    emitter: Emitter,
    listeners: Listeners,
}

impl RpcServer {
    /// Serve `methods` over `channel`.
    ///
    /// The returned task resolves to `Ok(())` once the peer closes the
    /// channel and every in-flight handler has answered.
    ///
    /// # Errors
    ///
    /// The task resolves to `AppError::Rpc` on an unknown method or a
    /// failing or panicking handler.
    #[must_use]
    pub fn listen(channel: MessageChannel, methods: MethodTable) -> (Self, JoinHandle<Result<()>>) {
        let (sender, inbound) = channel.into_parts();
        let listeners = Listeners::default();
        let server = Self {
            emitter: Emitter::from_sender(sender.clone()),
            listeners: listeners.clone(),
        };

        let span = info_span!("rpc_server");
        let task = tokio::spawn(serve(inbound, sender, Arc::new(methods), listeners).instrument(span));

        (server, task)
    }

    /// Send an `rpc.event` to the peer.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit`].
    pub async fn emit<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> Result<()> {
        self.emitter.emit(event, data).await
    }

    /// Cloneable emitter for use inside handlers.
    #[must_use]
    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    /// Listen for events sent by the peer.
    pub fn on(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        self.listeners.add(event, handler)
    }
}

async fn serve(
    mut inbound: mpsc::Receiver<String>,
    sender: ChannelSender,
    methods: Arc<MethodTable>,
    listeners: Listeners,
) -> Result<()> {
    let mut handlers: JoinSet<Result<()>> = JoinSet::new();

    loop {
        tokio::select! {
            frame = inbound.recv() => {
                let Some(frame) = frame else {
                    debug!("rpc server: channel closed");
                    break;
                };

                match Envelope::decode(&frame) {
                    Err(err) => {
                        warn!(error = %err, "rpc server: dropping malformed frame");
                    }
                    Ok(Envelope::Request { id, method, input }) => {
                        let Some(handler) = methods.get(&method) else {
                            error!(id, method, "rpc server: unknown method");
                            return Err(AppError::Rpc(format!("unknown method: {method}")));
                        };
                        let handler = Arc::clone(handler);
                        let sender = sender.clone();
                        handlers.spawn(async move {
                            let result = handler(input).await?;
                            let frame = Envelope::Result { id, result }.encode()?;
                            if sender.send(frame).await.is_err() {
                                debug!(id, "rpc server: peer gone before response");
                            }
                            Ok(())
                        });
                    }
                    Ok(Envelope::Event { event, data }) => {
                        let delivered = listeners.dispatch(&event, &data);
                        debug!(event, delivered, "rpc server: event dispatched");
                    }
                    Ok(Envelope::Result { id, .. }) => {
                        debug!(id, "rpc server: ignoring unsolicited result");
                    }
                }
            }

            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                check_handler(joined)?;
            }
        }
    }

    // Let in-flight handlers finish so their responses still go out.
    while let Some(joined) = handlers.join_next().await {
        check_handler(joined)?;
    }

    Ok(())
}

fn check_handler(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            error!(error = %err, "rpc server: handler failed");
            Err(err)
        }
        Err(join_err) => {
            error!(error = %join_err, "rpc server: handler panicked");
            Err(AppError::Rpc(format!("handler panicked: {join_err}")))
        }
    }
}
