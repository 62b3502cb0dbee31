//! Debounce and coalescing behaviour of `SyncQueue`.
//!
//! These run on the real clock: the flush path reads the share record from
//! `SQLite`, whose worker thread does not mix with a paused clock.
//! `shutdown()` is used to wait for in-flight flushes deterministically.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_tether::persistence::{db, record_repo::RecordRepo};
use agent_tether::share::data::{Data, FileDiff, PartInfo, SessionInfo};
use agent_tether::share::{
    ShareFuture, ShareRecord, ShareStore, ShareTransport, SyncBatch, SyncQueue,
};
use agent_tether::AppError;
use serde_json::{json, Map};

#[derive(Default)]
struct RecordingTransport {
    syncs: Mutex<Vec<(String, Vec<Data>)>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingTransport {
    fn syncs(&self) -> Vec<(String, Vec<Data>)> {
        self.syncs.lock().unwrap().clone()
    }
}

impl ShareTransport for RecordingTransport {
    fn create(&self, _session_id: &str) -> ShareFuture<'_, ShareRecord> {
        Box::pin(async { Err(AppError::Share("not used".into())) })
    }

    fn sync(&self, share: &ShareRecord, data: Vec<Data>) -> ShareFuture<'_, ()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Box::pin(async { Err(AppError::Share("connection refused".into())) });
        }
        self.syncs.lock().unwrap().push((share.id.clone(), data));
        Box::pin(async { Ok(()) })
    }

    fn remove(&self, _share: &ShareRecord) -> ShareFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn fetch(&self, _share_id: &str) -> ShareFuture<'_, Vec<Data>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

async fn store_with_shares(sessions: &[&str]) -> ShareStore {
    let db = db::connect_memory().await.expect("db connect");
    let store = ShareStore::new(RecordRepo::new(Arc::new(db)));
    for session in sessions {
        store
            .put(
                session,
                &ShareRecord {
                    id: format!("shr_{session}"),
                    secret: "secret".into(),
                    url: format!("https://share.test/{session}"),
                },
            )
            .await
            .expect("put share");
    }
    store
}

async fn queue(
    sessions: &[&str],
    window: Duration,
) -> (SyncQueue, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let store = store_with_shares(sessions).await;
    (SyncQueue::new(transport.clone(), store, window), transport)
}

fn part(id: &str, text: &str) -> Data {
    let mut extra = Map::new();
    extra.insert("text".into(), json!(text));
    Data::Part(PartInfo {
        id: id.into(),
        session_id: "ses_1".into(),
        message_id: "msg_1".into(),
        extra,
    })
}

fn session(title: &str) -> Data {
    Data::Session(SessionInfo {
        id: "ses_1".into(),
        title: title.into(),
        extra: Map::new(),
    })
}

// ── Batch ──────────────────────────────────────────────

#[test]
fn batch_keeps_first_seen_order_and_last_value() {
    let mut batch = SyncBatch::default();
    batch.insert(part("p1", "a"));
    batch.insert(part("p2", "b"));
    batch.insert(part("p1", "c"));

    assert_eq!(batch.len(), 2);
    assert_eq!(batch.into_items(), vec![part("p1", "c"), part("p2", "b")]);
}

#[test]
fn batch_never_coalesces_id_less_items() {
    let mut batch = SyncBatch::default();
    batch.insert(Data::SessionDiff(Vec::new()));
    batch.insert(Data::SessionDiff(vec![FileDiff {
        file: "a".into(),
        before: String::new(),
        after: String::new(),
        additions: 0,
        deletions: 0,
    }]));
    assert_eq!(batch.len(), 2);
}

// ── Queue ──────────────────────────────────────────────

#[tokio::test]
async fn repeated_updates_to_one_key_flush_only_the_last() {
    let (queue, transport) = queue(&["ses_1"], Duration::from_secs(30)).await;

    for n in 0..5 {
        queue.push("ses_1", part("p1", &format!("v{n}"))).await;
    }
    queue.push("ses_1", part("p2", "other")).await;
    assert_eq!(queue.pending_len("ses_1").await, 2);

    queue.shutdown().await;

    let syncs = transport.syncs();
    assert_eq!(syncs.len(), 1);
    assert_eq!(syncs[0].0, "shr_ses_1");
    assert_eq!(syncs[0].1, vec![part("p1", "v4"), part("p2", "other")]);
}

#[tokio::test]
async fn two_events_in_one_window_produce_one_post() {
    let (queue, transport) = queue(&["ses_1"], Duration::from_millis(100)).await;

    queue.push("ses_1", session("first")).await;
    queue.push("ses_1", part("p1", "hello")).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    queue.shutdown().await;

    let syncs = transport.syncs();
    assert_eq!(syncs.len(), 1, "expected a single POST: {syncs:?}");
    assert_eq!(syncs[0].1, vec![session("first"), part("p1", "hello")]);
}

#[tokio::test]
async fn nothing_is_sent_before_the_window_elapses() {
    let (queue, transport) = queue(&["ses_1"], Duration::from_millis(400)).await;

    queue.push("ses_1", session("s")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(queue.pending_len("ses_1").await, 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(queue.pending_sessions().await.is_empty());
    queue.shutdown().await;
    assert_eq!(transport.syncs().len(), 1);
}

#[tokio::test]
async fn later_events_do_not_extend_the_deadline() {
    let (queue, transport) = queue(&["ses_1"], Duration::from_millis(400)).await;

    queue.push("ses_1", part("p1", "a")).await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    queue.push("ses_1", part("p2", "b")).await;

    // 550ms after the first event: a reset timer would still be pending.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        queue.pending_sessions().await.is_empty(),
        "batch should have flushed at the original deadline"
    );

    queue.shutdown().await;
    let syncs = transport.syncs();
    assert_eq!(syncs.len(), 1);
    assert_eq!(syncs[0].1.len(), 2);
}

#[tokio::test]
async fn events_after_a_flush_start_a_new_batch() {
    let (queue, transport) = queue(&["ses_1"], Duration::from_millis(50)).await;

    queue.push("ses_1", part("p1", "a")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    queue.push("ses_1", part("p1", "b")).await;
    queue.shutdown().await;

    let syncs = transport.syncs();
    assert_eq!(syncs.len(), 2);
    assert_eq!(syncs[0].1, vec![part("p1", "a")]);
    assert_eq!(syncs[1].1, vec![part("p1", "b")]);
}

#[tokio::test]
async fn unshared_session_is_a_silent_no_op() {
    let (queue, transport) = queue(&[], Duration::from_millis(50)).await;

    queue.push("ses_1", session("s")).await;
    queue.shutdown().await;

    assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
    assert!(queue.pending_sessions().await.is_empty());
}

#[tokio::test]
async fn sessions_are_batched_independently() {
    let (queue, transport) = queue(&["ses_a", "ses_b"], Duration::from_secs(30)).await;

    queue.push("ses_a", part("p1", "a")).await;
    queue.push("ses_b", part("p1", "b")).await;
    assert_eq!(queue.pending_sessions().await, vec!["ses_a", "ses_b"]);

    queue.shutdown().await;

    let mut syncs = transport.syncs();
    syncs.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(syncs.len(), 2);
    assert_eq!(syncs[0], ("shr_ses_a".to_owned(), vec![part("p1", "a")]));
    assert_eq!(syncs[1], ("shr_ses_b".to_owned(), vec![part("p1", "b")]));
}

#[tokio::test]
async fn failed_flush_is_swallowed_and_queue_keeps_working() {
    let (queue, transport) = queue(&["ses_1"], Duration::from_millis(50)).await;
    transport.fail.store(true, Ordering::SeqCst);

    queue.push("ses_1", part("p1", "lost")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    assert!(queue.pending_sessions().await.is_empty(), "failed batch is not retried");

    transport.fail.store(false, Ordering::SeqCst);
    queue.push("ses_1", part("p1", "kept")).await;
    queue.shutdown().await;

    assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(transport.syncs(), vec![("shr_ses_1".to_owned(), vec![part("p1", "kept")])]);
}

#[tokio::test]
async fn enqueue_after_shutdown_flushes_immediately() {
    let (queue, transport) = queue(&["ses_1"], Duration::from_secs(30)).await;
    queue.shutdown().await;

    queue.push("ses_1", session("late")).await;
    queue.shutdown().await;

    assert_eq!(transport.syncs().len(), 1);
}

#[tokio::test]
async fn flush_gates_are_released_after_shutdown() {
    let (queue, transport) = queue(&["ses_a", "ses_b"], Duration::from_millis(20)).await;

    for round in 0..3 {
        queue.push("ses_a", part("p1", &format!("a{round}"))).await;
        queue.push("ses_b", part("p1", &format!("b{round}"))).await;
        queue.push("ses_unshared", part("p1", "x")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    queue.shutdown().await;

    assert_eq!(transport.syncs().len(), 6);
    assert_eq!(queue.flushing_sessions().await, 0);
}

#[tokio::test]
async fn overlapping_flushes_of_one_session_release_their_gate() {
    let (queue, transport) = queue(&["ses_1"], Duration::from_secs(30)).await;
    queue.shutdown().await;

    // After shutdown every push flushes at once, so these flushes contend
    // for the same session gate.
    for n in 0..8 {
        queue.push("ses_1", part(&format!("p{n}"), "v")).await;
    }
    queue.shutdown().await;

    let sent: usize = transport.syncs().iter().map(|(_, items)| items.len()).sum();
    assert_eq!(sent, 8);
    assert_eq!(queue.flushing_sessions().await, 0);
}
