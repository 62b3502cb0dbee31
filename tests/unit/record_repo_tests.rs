use std::sync::Arc;

use agent_tether::persistence::{db, record_repo::RecordRepo};
use agent_tether::share::{ShareRecord, ShareStore};
use agent_tether::AppError;
use serde_json::{json, Value};

async fn repo() -> RecordRepo {
    let db = db::connect_memory().await.expect("db connect");
    RecordRepo::new(Arc::new(db))
}

#[tokio::test]
async fn in_memory_connect_creates_record_table() {
    let pool = db::connect_memory()
        .await
        .expect("in-memory connect should succeed");
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM record")
        .fetch_one(&pool)
        .await
        .expect("record table should be queryable");
    assert_eq!(row.0, 0);
}

#[tokio::test]
async fn write_then_read_round_trips() {
    let repo = repo().await;
    repo.write(&["a", "b"], &json!({ "n": 1 })).await.expect("write");

    let value: Option<Value> = repo.read(&["a", "b"]).await.expect("read");
    assert_eq!(value, Some(json!({ "n": 1 })));
}

#[tokio::test]
async fn write_replaces_existing_value() {
    let repo = repo().await;
    repo.write(&["k"], &1).await.expect("write");
    repo.write(&["k"], &2).await.expect("overwrite");

    let value: Option<i64> = repo.read(&["k"]).await.expect("read");
    assert_eq!(value, Some(2));
}

#[tokio::test]
async fn missing_record_reads_as_none() {
    let repo = repo().await;
    let value: Option<Value> = repo.read(&["nope"]).await.expect("read");
    assert!(value.is_none());
}

#[tokio::test]
async fn remove_is_idempotent() {
    let repo = repo().await;
    repo.write(&["gone"], &true).await.expect("write");
    repo.remove(&["gone"]).await.expect("remove");
    repo.remove(&["gone"]).await.expect("remove again");

    let value: Option<bool> = repo.read(&["gone"]).await.expect("read");
    assert!(value.is_none());
}

#[tokio::test]
async fn list_returns_keys_under_prefix_only() {
    let repo = repo().await;
    repo.write(&["message", "s1", "m2"], &2).await.expect("write");
    repo.write(&["message", "s1", "m1"], &1).await.expect("write");
    repo.write(&["message", "s10", "m3"], &3).await.expect("write");
    repo.write(&["part", "m1", "p1"], &4).await.expect("write");

    let keys = repo.list(&["message", "s1"]).await.expect("list");
    assert_eq!(
        keys,
        vec![
            vec!["message".to_owned(), "s1".into(), "m1".into()],
            vec!["message".to_owned(), "s1".into(), "m2".into()],
        ]
    );
}

#[tokio::test]
async fn invalid_keys_are_rejected() {
    let repo = repo().await;
    let empty: &[&str] = &[];
    assert!(matches!(repo.write(empty, &1).await, Err(AppError::Db(_))));
    assert!(matches!(repo.write(&["a/b"], &1).await, Err(AppError::Db(_))));
    assert!(matches!(repo.write(&["a", ""], &1).await, Err(AppError::Db(_))));
}

#[tokio::test]
async fn mismatched_type_is_a_db_error() {
    let repo = repo().await;
    repo.write(&["n"], &"text").await.expect("write");
    let err = repo.read::<i64>(&["n"]).await.expect_err("type mismatch");
    assert!(err.to_string().contains("corrupt record n"));
}

#[tokio::test]
async fn on_disk_database_persists_between_connections() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("tether.db");

    {
        let repo = RecordRepo::new(Arc::new(db::connect(&path).await.expect("connect")));
        repo.write(&["k"], &"v").await.expect("write");
    }

    let repo = RecordRepo::new(Arc::new(db::connect(&path).await.expect("reconnect")));
    let value: Option<String> = repo.read(&["k"]).await.expect("read");
    assert_eq!(value.as_deref(), Some("v"));
}

#[tokio::test]
async fn share_store_keys_records_by_session() {
    let repo = repo().await;
    let store = ShareStore::new(repo.clone());
    let record = ShareRecord {
        id: "shr_1".into(),
        secret: "s3cret".into(),
        url: "https://share.example.com/shr_1".into(),
    };

    store.put("ses_1", &record).await.expect("put");
    assert_eq!(store.get("ses_1").await.expect("get"), Some(record.clone()));
    assert_eq!(store.shared_sessions().await.expect("list"), vec!["ses_1".to_owned()]);

    let raw: Option<ShareRecord> = repo.read(&["session_share", "ses_1"]).await.expect("raw read");
    assert_eq!(raw, Some(record));

    store.delete("ses_1").await.expect("delete");
    assert!(store.get("ses_1").await.expect("get").is_none());
}
