//! External process handling.
//!
//! - `shell`: selection of an interactive shell and per-shell invocation args.
//! - `spawner`: spawn a child as its own process-group leader and watch its exit.
//! - `supervisor`: graded termination of the whole process tree.

pub mod shell;
pub mod spawner;
pub mod supervisor;

pub use shell::{ShellInvocation, ShellResolver};
pub use spawner::{spawn_supervised, ExitInfo, SpawnSpec, SupervisedChild};
pub use supervisor::{ExitFlag, ProcessHandle, SupervisorState};
