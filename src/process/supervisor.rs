//! Process-tree termination.
//!
//! A [`ProcessHandle`] pairs a pid with a caller-supplied "has exited"
//! predicate. The OS exit notification belongs to whoever spawned the
//! process; the supervisor only reads the predicate.
//!
//! On POSIX, [`ProcessHandle::terminate`] signals the whole process group
//! (`SIGTERM`, grace period, then `SIGKILL` while any member remains) and
//! falls back to the direct pid when the group signal cannot be delivered. On Windows it delegates to
//! `taskkill /f /t`, which is already forceful and tree-aware.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

/// Default delay between the graceful and the forced signal.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(200);

/// Lifecycle of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No stop requested yet.
    Running,
    /// Termination in progress; cannot be aborted.
    Terminating,
    /// Escalation finished (or the process had already exited).
    Terminated,
}

impl SupervisorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Terminating,
            _ => Self::Terminated,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Terminating => 1,
            Self::Terminated => 2,
        }
    }
}

/// Shared flag set by the task that owns the child's exit notification.
#[derive(Debug, Clone, Default)]
pub struct ExitFlag(Arc<AtomicBool>);

impl ExitFlag {
    /// A fresh, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the process has exited.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the process has exited.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type ExitedPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Handle used to tear down a spawned process and its descendants.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: u32,
    exited: ExitedPredicate,
    state: Arc<AtomicU8>,
    grace: Duration,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("state", &self.state())
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Wrap `pid` with an arbitrary exited predicate.
    #[must_use]
    pub fn new(pid: u32, exited: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            pid,
            exited: Arc::new(exited),
            state: Arc::new(AtomicU8::new(SupervisorState::Running.as_u8())),
            grace: DEFAULT_GRACE,
        }
    }

    /// Wrap `pid` with an [`ExitFlag`] as the exited predicate.
    #[must_use]
    pub fn with_flag(pid: u32, flag: ExitFlag) -> Self {
        Self::new(pid, move || flag.is_set())
    }

    /// Override the grace period between `SIGTERM` and `SIGKILL`.
    #[must_use]
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Platform process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        SupervisorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the caller-supplied predicate reports an exit.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        (self.exited)()
    }

    /// Terminate the process tree rooted at this handle.
    ///
    /// Only the first call performs the escalation; later calls return the
    /// current state immediately. Delivery failures are logged, never
    /// returned: teardown is best-effort.
    pub async fn terminate(&self) -> SupervisorState {
        if self
            .state
            .compare_exchange(
                SupervisorState::Running.as_u8(),
                SupervisorState::Terminating.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return self.state();
        }

        if self.has_exited() {
            debug!(pid = self.pid, "process already exited, nothing to terminate");
        } else {
            info!(pid = self.pid, grace = ?self.grace, "terminating process tree");
            kill_tree(self.pid, self.exited.as_ref(), self.grace).await;
        }

        self.state
            .store(SupervisorState::Terminated.as_u8(), Ordering::SeqCst);
        SupervisorState::Terminated
    }
}

#[cfg(unix)]
async fn kill_tree(pid: u32, exited: &(dyn Fn() -> bool + Send + Sync), grace: Duration) {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range for signal delivery");
        return;
    };
    let target = Pid::from_raw(raw);

    match killpg(target, Signal::SIGTERM) {
        Ok(()) => {
            tokio::time::sleep(grace).await;
            // The leader may be gone while descendants that ignore SIGTERM
            // still hold the group.
            match killpg(target, None::<Signal>) {
                Err(Errno::ESRCH) => debug!(pid, "process group empty after grace"),
                _ => {
                    if let Err(err) = killpg(target, Signal::SIGKILL) {
                        debug!(pid, %err, "SIGKILL to process group failed");
                    }
                }
            }
        }
        Err(err) => {
            debug!(pid, %err, "process group signal failed, signalling pid directly");
            if let Err(err) = kill(target, Signal::SIGTERM) {
                warn!(pid, %err, "SIGTERM to pid failed, giving up");
                return;
            }
            tokio::time::sleep(grace).await;
            if !exited() {
                if let Err(err) = kill(target, Signal::SIGKILL) {
                    debug!(pid, %err, "SIGKILL to pid failed");
                }
            }
        }
    }
}

#[cfg(windows)]
async fn kill_tree(pid: u32, _exited: &(dyn Fn() -> bool + Send + Sync), _grace: Duration) {
    use std::process::Stdio;

    let status = tokio::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/f", "/t"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if !status.success() => {
            debug!(pid, ?status, "taskkill reported failure");
        }
        Ok(_) => {}
        Err(err) => warn!(pid, %err, "failed to run taskkill"),
    }
}
