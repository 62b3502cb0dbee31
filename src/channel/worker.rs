//! Worker processes reached over stdio.
//!
//! [`spawn_worker`] launches a child through the supervised spawner and
//! wraps its stdin/stdout as a [`MessageChannel`]. Stderr is forwarded to
//! the host's log at `DEBUG`. Dropping a [`WorkerProcess`] does not stop
//! the child; call [`WorkerProcess::shutdown`].

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::stream::{spawn_stream_channel, StreamTasks};
use super::MessageChannel;
use crate::process::spawner::{spawn_supervised, ExitInfo, SpawnSpec, SupervisedChild};
use crate::{AppError, Result};

/// A running worker child and its channel tasks.
#[derive(Debug)]
pub struct WorkerProcess {
    child: SupervisedChild,
    tasks: StreamTasks,
    cancel: CancellationToken,
}

impl WorkerProcess {
    /// Worker pid.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.pid()
    }

    /// Wait for the worker to exit on its own.
    pub async fn wait(&self) -> ExitInfo {
        self.child.wait().await
    }

    /// Stop the channel tasks and terminate the worker's process tree.
    pub async fn shutdown(self) -> ExitInfo {
        self.cancel.cancel();
        let info = self.child.shutdown().await;
        // Both tasks observe the cancellation; their results carry nothing new.
        let _ = self.tasks.reader.await;
        let _ = self.tasks.writer.await;
        info!(pid = self.child.pid(), reason = %info.reason, "worker shut down");
        info
    }
}

/// Spawn a worker and connect to it over its stdio.
///
/// # Errors
///
/// Returns `AppError::Process` if the spawn fails and `AppError::Channel`
/// if the child's stdio could not be captured.
pub fn spawn_worker(spec: SpawnSpec) -> Result<(MessageChannel, WorkerProcess)> {
    let mut child = spawn_supervised(&spec.pipe_stdin())?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Channel("failed to capture worker stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Channel("failed to capture worker stdout".into()))?;

    if let Some(stderr) = child.stderr.take() {
        let pid = child.pid();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(pid, line, "worker stderr");
            }
        });
    }

    let cancel = CancellationToken::new();
    let label = format!("worker-{}", child.pid());
    let (channel, tasks) = spawn_stream_channel(&label, stdout, stdin, &cancel);

    Ok((
        channel,
        WorkerProcess {
            child,
            tasks,
            cancel,
        },
    ))
}
