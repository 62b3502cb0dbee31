//! Process-tree termination against real processes.

#![cfg(target_os = "linux")]

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use agent_tether::process::{
    spawn_supervised, ExitFlag, ProcessHandle, SpawnSpec, SupervisorState,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::test_helpers::{process_alive, wait_until};

const GRACE: Duration = Duration::from_millis(200);
const SLACK: Duration = Duration::from_secs(2);

/// Read the first stdout line of a supervised child as a pid.
async fn read_pid(stdout: tokio::process::ChildStdout) -> u32 {
    let mut lines = BufReader::new(stdout).lines();
    let line = lines.next_line().await.unwrap().expect("pid line");
    line.trim().parse().expect("numeric pid")
}

#[tokio::test]
async fn group_kill_reaches_grandchildren() {
    let spec = SpawnSpec::shell(Path::new("/bin/sh"), "sleep 30 & echo $!; wait").grace(GRACE);
    let mut child = spawn_supervised(&spec).expect("spawn");
    let grandchild = read_pid(child.stdout.take().unwrap()).await;
    assert!(process_alive(grandchild));

    let started = tokio::time::Instant::now();
    let exit = child.shutdown().await;
    assert!(started.elapsed() < GRACE + SLACK);
    assert_eq!(exit.code, None, "killed by signal");

    assert!(
        wait_until(SLACK, || !process_alive(grandchild)).await,
        "grandchild {grandchild} survived group kill"
    );
    assert_eq!(child.handle.state(), SupervisorState::Terminated);
}

#[tokio::test]
async fn term_ignoring_grandchild_is_killed_after_leader_exits() {
    let spec = SpawnSpec::shell(
        Path::new("/bin/sh"),
        "(trap '' TERM; exec sleep 30) & echo $!; wait",
    )
    .grace(GRACE);
    let mut child = spawn_supervised(&spec).expect("spawn");
    let grandchild = read_pid(child.stdout.take().unwrap()).await;
    assert!(process_alive(grandchild));

    let exit = child.shutdown().await;
    assert_eq!(exit.code, None, "leader dies on SIGTERM");

    assert!(
        wait_until(SLACK, || !process_alive(grandchild)).await,
        "grandchild {grandchild} ignoring SIGTERM survived teardown"
    );
}

#[tokio::test]
async fn term_ignoring_process_is_killed_after_grace() {
    let spec = SpawnSpec::shell(Path::new("/bin/sh"), "trap '' TERM; echo ready; while :; do sleep 1; done")
        .grace(GRACE);
    let mut child = spawn_supervised(&spec).expect("spawn");
    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();
    assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("ready"));

    let started = tokio::time::Instant::now();
    let exit = child.shutdown().await;
    assert!(started.elapsed() >= GRACE, "SIGKILL only after the grace period");
    assert!(started.elapsed() < GRACE + SLACK);
    assert_eq!(exit.code, None);
    assert!(!process_alive(child.pid()));
}

#[tokio::test]
async fn fallback_signals_the_direct_child() {
    // Not a group leader: the group signal fails and the pid is signalled instead.
    let mut cmd = Command::new("sleep");
    cmd.arg("30").stdin(Stdio::null()).kill_on_drop(true);
    let mut raw = cmd.spawn().expect("spawn");
    let pid = raw.id().expect("pid");

    let flag = ExitFlag::new();
    let waiter = {
        let flag = flag.clone();
        tokio::spawn(async move {
            let status = raw.wait().await;
            flag.set();
            status
        })
    };

    let handle = ProcessHandle::with_flag(pid, flag.clone()).grace(GRACE);
    assert_eq!(handle.terminate().await, SupervisorState::Terminated);

    let status = tokio::time::timeout(SLACK, waiter)
        .await
        .expect("child reaped")
        .unwrap()
        .unwrap();
    assert!(!status.success());
    assert!(flag.is_set());
}

#[tokio::test]
async fn exited_process_is_not_signalled() {
    let spec = SpawnSpec::new("true", Vec::new());
    let child = spawn_supervised(&spec).expect("spawn");
    let exit = child.wait().await;
    assert_eq!(exit.code, Some(0));
    assert!(child.handle.has_exited());

    let started = tokio::time::Instant::now();
    assert_eq!(child.handle.terminate().await, SupervisorState::Terminated);
    assert!(started.elapsed() < GRACE, "no grace wait for an exited process");
}

#[tokio::test]
async fn terminate_runs_escalation_once() {
    let spec = SpawnSpec::new("sleep", vec!["30".into()]).grace(GRACE);
    let child = spawn_supervised(&spec).expect("spawn");

    let first = child.handle.clone();
    let second = child.handle.clone();
    let (a, b) = tokio::join!(first.terminate(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        second.terminate().await
    });
    assert_eq!(a, SupervisorState::Terminated);
    assert_eq!(b, SupervisorState::Terminating, "second caller does not wait");

    child.wait().await;
    assert_eq!(child.handle.terminate().await, SupervisorState::Terminated);
}

#[tokio::test]
async fn exit_code_is_reported() {
    let spec = SpawnSpec::shell(Path::new("/bin/sh"), "exit 7");
    let child = spawn_supervised(&spec).expect("spawn");
    let exit = child.wait().await;
    assert_eq!(exit.code, Some(7));
    assert_eq!(exit.reason, "process exited with code 7");
}

#[tokio::test]
async fn shell_spec_sets_env_and_cwd() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = SpawnSpec::shell(Path::new("/bin/sh"), "echo \"$TERM $MARKER $(pwd)\"")
        .env("MARKER", "m1")
        .cwd(dir.path());
    let mut child = spawn_supervised(&spec).expect("spawn");
    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();
    let line = lines.next_line().await.unwrap().expect("output");

    let cwd = dir.path().canonicalize().unwrap();
    assert_eq!(line, format!("dumb m1 {}", cwd.display()));
    assert_eq!(child.wait().await.code, Some(0));
}

#[tokio::test]
async fn missing_program_is_a_process_error() {
    let spec = SpawnSpec::new("/definitely/not/here", Vec::new());
    let err = spawn_supervised(&spec).expect_err("spawn fails");
    assert!(matches!(err, agent_tether::AppError::Process(msg) if msg.contains("failed to spawn")));
}
