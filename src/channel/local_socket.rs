//! Local socket transport.
//!
//! Uses a named pipe (Windows) or Unix domain socket (Linux/macOS) via the
//! `interprocess` crate. Each accepted or connected stream is split and
//! wrapped with [`spawn_stream_channel`], so the RPC layer runs unchanged
//! over it.

use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
use interprocess::local_socket::{GenericNamespaced, ListenerOptions, Name};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::stream::{spawn_stream_channel, StreamTasks};
use super::MessageChannel;
use crate::{AppError, Result};

fn socket_name(name: &str) -> Result<Name<'_>> {
    name.to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Channel(format!("invalid socket name '{name}': {err}")))
}

/// Listening side of a local socket channel.
pub struct LocalSocketListener {
    name: String,
    listener: Listener,
    cancel: CancellationToken,
}

impl LocalSocketListener {
    /// Bind a namespaced local socket.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` if the name is invalid or the listener
    /// cannot be created (for example the name is already in use).
    pub fn bind(name: &str, cancel: CancellationToken) -> Result<Self> {
        let listener = ListenerOptions::new()
            .name(socket_name(name)?)
            .create_tokio()
            .map_err(|err| AppError::Channel(format!("failed to create listener: {err}")))?;

        info!(socket = name, "local socket listening");

        Ok(Self {
            name: name.to_owned(),
            listener,
            cancel,
        })
    }

    /// Wait for the next peer and wrap its stream as a channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` if accepting the connection fails.
    pub async fn accept(&self) -> Result<(MessageChannel, StreamTasks)> {
        let stream = self
            .listener
            .accept()
            .await
            .map_err(|err| AppError::Channel(format!("accept failed: {err}")))?;
        info!(socket = %self.name, "local socket peer connected");
        Ok(wrap(&self.name, stream, &self.cancel))
    }
}

/// Connect to a listening local socket.
///
/// # Errors
///
/// Returns `AppError::Channel` if the name is invalid or nobody is listening.
pub async fn connect(
    name: &str,
    cancel: &CancellationToken,
) -> Result<(MessageChannel, StreamTasks)> {
    let stream = Stream::connect(socket_name(name)?)
        .await
        .map_err(|err| AppError::Channel(format!("failed to connect to '{name}': {err}")))?;
    Ok(wrap(name, stream, cancel))
}

fn wrap(label: &str, stream: Stream, cancel: &CancellationToken) -> (MessageChannel, StreamTasks) {
    let (reader, writer) = stream.split();
    spawn_stream_channel(label, reader, writer, cancel)
}
