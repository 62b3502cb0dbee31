//! Duplex, message-framed channels.
//!
//! Every transport is normalised to a [`MessageChannel`]: an outbound
//! [`ChannelSender`] plus an inbound receiver of opaque text frames. The
//! RPC layer never sees the transport underneath.
//!
//! Submodules:
//! - `codec`: NDJSON framing for byte-stream transports.
//! - `stream`: reader/writer tasks bridging any async byte stream to a channel.
//! - `local_socket`: named pipe / Unix domain socket transport.
//! - `worker`: spawn a supervised worker process and talk to it over stdio.

pub mod codec;
pub mod local_socket;
pub mod stream;
pub mod worker;

use tokio::sync::mpsc;

use crate::{AppError, Result};

/// Default buffer size for in-process channels.
pub const DEFAULT_CAPACITY: usize = 256;

/// Cloneable outbound half of a [`MessageChannel`].
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<String>,
}

impl ChannelSender {
    /// Queue one frame for delivery to the peer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` if the peer side has been dropped.
    pub async fn send(&self, frame: String) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| AppError::Channel("channel closed".into()))
    }

    /// Whether the receiving side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A duplex channel carrying text frames in FIFO order.
#[derive(Debug)]
pub struct MessageChannel {
    sender: ChannelSender,
    inbound: mpsc::Receiver<String>,
}

impl MessageChannel {
    /// Assemble a channel from an outbound sender and an inbound receiver.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        Self {
            sender: ChannelSender { tx: outbound },
            inbound,
        }
    }

    /// Two connected in-process endpoints; what one sends the other receives.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    /// Cloneable handle to the outbound half.
    #[must_use]
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Send one frame to the peer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` if the peer side has been dropped.
    pub async fn send(&self, frame: String) -> Result<()> {
        self.sender.send(frame).await
    }

    /// Receive the next frame; `None` once the peer has closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Split into the outbound handle and the inbound receiver.
    #[must_use]
    pub fn into_parts(self) -> (ChannelSender, mpsc::Receiver<String>) {
        (self.sender, self.inbound)
    }
}
