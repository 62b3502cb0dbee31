//! Supervised process spawner.
//!
//! Spawns a child with:
//! - its own process group on POSIX (`process_group(0)`), so a single
//!   group signal reaches every descendant;
//! - piped stdio, handed back to the caller;
//! - a background wait task that owns the [`Child`], flips the
//!   [`ExitFlag`] read by the supervisor, and publishes [`ExitInfo`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tracing::{info, warn};

use super::shell::ShellInvocation;
use super::supervisor::{ExitFlag, ProcessHandle, DEFAULT_GRACE};
use crate::{AppError, Result};

/// What to run.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Executable.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables, layered over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Working directory; inherits the parent's when `None`.
    pub cwd: Option<PathBuf>,
    /// Whether to pipe stdin (otherwise it is `/dev/null`).
    pub pipe_stdin: bool,
    /// Grace period used when terminating the tree.
    pub grace: Duration,
}

impl SpawnSpec {
    /// Run `program` with `args`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            cwd: None,
            pipe_stdin: false,
            grace: DEFAULT_GRACE,
        }
    }

    /// Run `command` through `shell` with `TERM=dumb`.
    #[must_use]
    pub fn shell(shell: &Path, command: &str) -> Self {
        let invocation = ShellInvocation::build(shell, command);
        let mut spec = Self::new(invocation.shell, invocation.args);
        spec.env.push(("TERM".into(), "dumb".into()));
        spec
    }

    /// Add one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Pipe stdin instead of closing it.
    #[must_use]
    pub fn pipe_stdin(mut self) -> Self {
        self.pipe_stdin = true;
        self
    }

    /// Override the termination grace period.
    #[must_use]
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

/// How a supervised child ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, absent when killed by a signal or when waiting failed.
    pub code: Option<i32>,
    /// Human-readable reason.
    pub reason: String,
}

/// A spawned child plus everything needed to observe and stop it.
#[derive(Debug)]
pub struct SupervisedChild {
    /// Termination handle for the process tree.
    pub handle: ProcessHandle,
    /// Piped stdin, when requested.
    pub stdin: Option<ChildStdin>,
    /// Piped stdout.
    pub stdout: Option<ChildStdout>,
    /// Piped stderr.
    pub stderr: Option<ChildStderr>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

impl SupervisedChild {
    /// Platform process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    /// Wait until the child exits.
    pub async fn wait(&self) -> ExitInfo {
        let mut rx = self.exit_rx.clone();
        let info = match rx.wait_for(Option::is_some).await {
            Ok(info) => info.clone().unwrap_or_else(|| unknown_exit("no exit status")),
            Err(_) => unknown_exit("exit watcher dropped"),
        };
        info
    }

    /// Terminate the tree and wait for the direct child to be reaped.
    pub async fn shutdown(&self) -> ExitInfo {
        self.handle.terminate().await;
        self.wait().await
    }
}

fn unknown_exit(reason: &str) -> ExitInfo {
    ExitInfo {
        code: None,
        reason: reason.to_owned(),
    }
}

/// Spawn `spec` as a supervised child.
///
/// # Errors
///
/// Returns `AppError::Process` if the OS refuses to spawn the program or
/// reports no pid for it.
pub fn spawn_supervised(spec: &SpawnSpec) -> Result<SupervisedChild> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if spec.pipe_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Process(format!(
            "failed to spawn {}: {err}",
            spec.program.display()
        ))
    })?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::Process("spawned process has no pid".into()))?;

    info!(pid, program = %spec.program.display(), "process spawned");

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let flag = ExitFlag::new();
    let (exit_tx, exit_rx) = watch::channel(None);
    tokio::spawn(watch_exit(pid, child, flag.clone(), exit_tx));

    Ok(SupervisedChild {
        handle: ProcessHandle::with_flag(pid, flag).grace(spec.grace),
        stdin,
        stdout,
        stderr,
        exit_rx,
    })
}

async fn watch_exit(
    pid: u32,
    mut child: Child,
    flag: ExitFlag,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    let info = match child.wait().await {
        Ok(status) => {
            let code = status.code();
            let reason = code.map_or_else(
                || "process terminated by signal".to_owned(),
                |c| format!("process exited with code {c}"),
            );
            ExitInfo { code, reason }
        }
        Err(err) => {
            warn!(pid, %err, "error waiting for child process");
            unknown_exit(&format!("wait error: {err}"))
        }
    };

    flag.set();
    info!(pid, reason = %info.reason, "process exited");
    // Nobody listening is fine; the flag already carries the fact.
    let _ = exit_tx.send(Some(info));
}
