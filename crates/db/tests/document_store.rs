use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use runlatch_core::error::{StoreError, WorkerError};
use runlatch_core::store::{DocumentStore, Fields, Transaction};
use runlatch_core::trigger::ChangeKind;
use runlatch_core::{Queue, StateDocument, Worker};
use runlatch_db::{ChangeListener, PgDocumentStore};
use sqlx::PgPool;

/// Connect, migrate, verify schema.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_bootstrap(pool: PgPool) {
    runlatch_db::health_check(&pool).await.unwrap();

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_create_get_update(pool: PgPool) {
    let store = PgDocumentStore::new(pool);

    let mut tx = store.begin().await.unwrap();
    tx.create("jobs/a", Fields::new().with("n", 1).with("label", "a"))
        .await
        .unwrap();
    tx.update("jobs/a", Fields::new().with("n", 2).with_server_timestamp("at"))
        .await
        .unwrap();

    // Read-your-writes inside the transaction.
    let doc = tx.get("jobs/a").await.unwrap().unwrap();
    assert_eq!(doc.field("n"), Some(&serde_json::json!(2)));
    assert_eq!(doc.field("label"), Some(&serde_json::json!("a")));
    assert!(doc.field("at").unwrap().is_string());
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert_matches!(
        tx.create("jobs/a", Fields::new()).await,
        Err(StoreError::AlreadyExists(_))
    );
    tx.rollback().await.unwrap();
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_update_missing_document(pool: PgPool) {
    let store = PgDocumentStore::new(pool);
    let mut tx = store.begin().await.unwrap();
    assert_matches!(
        tx.update("jobs/missing", Fields::new().with("n", 1)).await,
        Err(StoreError::NotFound(_))
    );
    tx.rollback().await.unwrap();
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_list_direct_children(pool: PgPool) {
    let store = PgDocumentStore::new(pool);
    let mut tx = store.begin().await.unwrap();
    for path in ["jobs/a", "jobs/b", "jobs/a/notes/x", "other/c"] {
        tx.set(path, Fields::new().with("p", path)).await.unwrap();
    }
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let paths: Vec<String> = tx
        .list("jobs")
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.path)
        .collect();
    tx.rollback().await.unwrap();
    assert_eq!(paths, vec!["jobs/a", "jobs/b"]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_finished_transaction_rejects_use(pool: PgPool) {
    let store = PgDocumentStore::new(pool);
    let mut tx = store.begin().await.unwrap();
    tx.commit().await.unwrap();
    assert_matches!(tx.get("jobs/a").await, Err(StoreError::Finished));
    assert_matches!(tx.commit().await, Err(StoreError::Finished));
}

struct NoopWorker;

#[async_trait]
impl Worker for NoopWorker {
    async fn execute(&self, _tx: &mut dyn Transaction) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn needs_another_run(&self, _tx: &mut dyn Transaction) -> Result<bool, WorkerError> {
        Ok(true)
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_full_run_cycle(pool: PgPool) {
    let store = Arc::new(PgDocumentStore::new(pool));
    let processor = Queue::new("jobs")
        .unwrap()
        .processor(store.clone(), vec![Arc::new(NoopWorker) as Arc<dyn Worker>])
        .unwrap();

    processor.process("run-1").await.unwrap();

    let state = processor
        .queue()
        .read_state(&*store)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        state,
        StateDocument {
            is_running: false,
            last_run_id: "run-1".into(),
            last_run_at: state.last_run_at,
            disabled: false,
            force_run_ref: Some("jobs/$queue/force/$run".into()),
        }
    );

    let mut tx = store.begin().await.unwrap();
    assert!(tx.get("jobs/$queue/force/$run").await.unwrap().is_some());
    tx.rollback().await.unwrap();
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_held_lock_rejects_second_run(pool: PgPool) {
    let store = Arc::new(PgDocumentStore::new(pool));
    let processor = Queue::new("jobs")
        .unwrap()
        .processor(store, vec![Arc::new(NoopWorker) as Arc<dyn Worker>])
        .unwrap();

    processor.run("run-1").start().await.unwrap();
    let err = processor.process("run-2").await.unwrap_err();
    assert!(err.is_already_running());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_listener_receives_commits(pool: PgPool) {
    let mut listener = ChangeListener::connect(&pool).await.unwrap();
    let store = PgDocumentStore::new(pool);

    let mut tx = store.begin().await.unwrap();
    tx.create("jobs/a", Fields::new()).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.delete("jobs/a").await.unwrap();
    tx.commit().await.unwrap();

    let created = tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.path, "jobs/a");
    assert_eq!(created.kind, ChangeKind::Create);

    let deleted = tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deleted.kind, ChangeKind::Delete);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_rolled_back_writes_are_not_announced(pool: PgPool) {
    let mut listener = ChangeListener::connect(&pool).await.unwrap();
    let store = PgDocumentStore::new(pool);

    let mut tx = store.begin().await.unwrap();
    tx.create("jobs/ghost", Fields::new()).await.unwrap();
    tx.rollback().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.create("jobs/real", Fields::new()).await.unwrap();
    tx.commit().await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.path, "jobs/real");
}
