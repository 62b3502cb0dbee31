use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_tether::process::{ExitFlag, ProcessHandle, SupervisorState};

#[test]
fn exit_flag_starts_unset_and_is_shared_by_clones() {
    let flag = ExitFlag::new();
    let observer = flag.clone();
    assert!(!observer.is_set());
    flag.set();
    assert!(observer.is_set());
}

#[test]
fn new_handle_is_running() {
    let handle = ProcessHandle::new(4242, || false);
    assert_eq!(handle.pid(), 4242);
    assert_eq!(handle.state(), SupervisorState::Running);
    assert!(!handle.has_exited());
}

#[tokio::test]
async fn already_exited_process_is_not_signalled() {
    let flag = ExitFlag::new();
    flag.set();
    // Out-of-range pid: any signal attempt would only log a warning.
    let handle = ProcessHandle::with_flag(u32::MAX, flag).grace(Duration::from_secs(60));

    let started = tokio::time::Instant::now();
    assert_eq!(handle.terminate().await, SupervisorState::Terminated);
    assert!(started.elapsed() < Duration::from_secs(5), "grace period should be skipped");
    assert_eq!(handle.state(), SupervisorState::Terminated);
}

#[tokio::test]
async fn terminate_is_idempotent() {
    let checks = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&checks);
    let handle = ProcessHandle::new(u32::MAX, move || {
        counted.fetch_add(1, Ordering::SeqCst);
        true
    });

    assert_eq!(handle.terminate().await, SupervisorState::Terminated);
    let after_first = checks.load(Ordering::SeqCst);
    assert_eq!(handle.terminate().await, SupervisorState::Terminated);
    assert_eq!(checks.load(Ordering::SeqCst), after_first, "second call must not re-run escalation");
}

#[tokio::test]
async fn clones_share_lifecycle_state() {
    let handle = ProcessHandle::new(u32::MAX, || true);
    let clone = handle.clone();
    clone.terminate().await;
    assert_eq!(handle.state(), SupervisorState::Terminated);
}
