//! Byte-stream channel tasks.
//!
//! Bridges any [`AsyncRead`] / [`AsyncWrite`] pair (child stdio, local
//! socket halves) to a [`MessageChannel`]. A reader task decodes NDJSON
//! frames with [`FrameCodec`] and forwards them inbound; a writer task
//! drains the outbound queue into the stream.
//!
//! When the reader hits EOF it drops its inbound sender, so the channel's
//! `recv` returns `None` and upper layers observe the close.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::codec::FrameCodec;
use super::{MessageChannel, DEFAULT_CAPACITY};
use crate::{AppError, Result};

/// Join handles for the two background tasks backing a stream channel.
#[derive(Debug)]
pub struct StreamTasks {
    /// Inbound decode task.
    pub reader: JoinHandle<Result<()>>,
    /// Outbound encode task.
    pub writer: JoinHandle<Result<()>>,
}

/// Wrap a byte stream as a [`MessageChannel`].
///
/// `label` is attached to every log line emitted by the two tasks.
#[must_use]
pub fn spawn_stream_channel<R, W>(
    label: &str,
    reader: R,
    writer: W,
    cancel: &CancellationToken,
) -> (MessageChannel, StreamTasks)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (inbound_tx, inbound_rx) = mpsc::channel(DEFAULT_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(DEFAULT_CAPACITY);

    let reader = tokio::spawn(run_reader(
        label.to_owned(),
        reader,
        inbound_tx,
        cancel.clone(),
    ));
    let writer = tokio::spawn(run_writer(
        label.to_owned(),
        writer,
        outbound_rx,
        cancel.clone(),
    ));

    (
        MessageChannel::new(outbound_tx, inbound_rx),
        StreamTasks { reader, writer },
    )
}

/// Reader task: decode frames from `reader` and forward them to `inbound_tx`.
///
/// Oversized frames are logged and skipped. Empty lines are ignored. The
/// task returns `Ok(())` on EOF, cancellation, or when the inbound receiver
/// is dropped.
///
/// # Errors
///
/// Never fails today; the `Result` mirrors [`run_writer`] so both handles
/// share a type.
pub async fn run_reader<R>(
    label: String,
    reader: R,
    inbound_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(reader, FrameCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(label, "channel reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(label, "channel reader: EOF");
                        break;
                    }
                    Some(Err(AppError::Channel(ref msg))) => {
                        warn!(label, error = msg.as_str(), "channel reader: framing error, skipping");
                    }
                    Some(Err(e)) => {
                        warn!(label, error = %e, "channel reader: IO error, stopping");
                        break;
                    }
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if inbound_tx.send(line).await.is_err() {
                            debug!(label, "channel reader: receiver dropped, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Writer task: drain `outbound_rx` and write each frame as one NDJSON line.
///
/// Exits cleanly on cancellation or once every sender is dropped.
///
/// # Errors
///
/// Returns `AppError::Channel("write failed: …")` if the underlying stream
/// rejects a write (for example the peer process has exited).
pub async fn run_writer<W>(
    label: String,
    writer: W,
    mut outbound_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(writer, FrameCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(label, "channel writer: cancellation received, stopping");
                break;
            }

            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    debug!(label, "channel writer: all senders dropped, stopping");
                    break;
                };

                // An embedded newline would split the frame in two on the wire.
                if frame.contains('\n') {
                    warn!(label, "channel writer: frame contains a newline, dropping");
                    continue;
                }

                framed.send(frame).await.map_err(|e| {
                    warn!(label, error = %e, "channel writer: write failed");
                    AppError::Channel(format!("write failed: {e}"))
                })?;
            }
        }
    }

    Ok(())
}
