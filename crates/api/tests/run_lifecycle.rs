//! Runs triggered over HTTP must release the queue lock even when the
//! response is never delivered.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use common::{send_json, test_config};
use runlatch_api::config::ServerConfig;
use runlatch_core::error::StoreError;
use runlatch_core::memory::MemoryStore;
use runlatch_core::store::{Document, DocumentStore, Fields, Transaction};
use serde_json::json;

/// A memory store whose collection listings take `delay` to answer.
struct SlowListStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl DocumentStore for SlowListStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(SlowListTransaction {
            inner: self.inner.begin().await?,
            delay: self.delay,
        }))
    }
}

struct SlowListTransaction {
    inner: Box<dyn Transaction>,
    delay: Duration,
}

#[async_trait]
impl Transaction for SlowListTransaction {
    async fn get(&mut self, path: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(path).await
    }

    async fn list(&mut self, collection: &str) -> Result<Vec<Document>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.list(collection).await
    }

    async fn create(&mut self, path: &str, fields: Fields) -> Result<(), StoreError> {
        self.inner.create(path, fields).await
    }

    async fn update(&mut self, path: &str, fields: Fields) -> Result<(), StoreError> {
        self.inner.update(path, fields).await
    }

    async fn set(&mut self, path: &str, fields: Fields) -> Result<(), StoreError> {
        self.inner.set(path, fields).await
    }

    async fn delete(&mut self, path: &str) -> Result<(), StoreError> {
        self.inner.delete(path).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn timed_out_run_still_releases_the_lock() {
    let store = MemoryStore::new();
    store.insert("items/a", json!({ "n": 1 }));
    let slow = SlowListStore {
        inner: store.clone(),
        delay: Duration::from_secs(2),
    };
    let config = ServerConfig {
        request_timeout_secs: 1,
        ..test_config()
    };
    let app = common::build_test_app_with_store(Arc::new(slow), config);

    let response = send_json(
        app,
        Method::POST,
        "/api/v1/runs",
        json!({ "path": "items", "run_id": "run-1" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    let state = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(doc) = store.document("items/$queue") {
                if doc.field("isRunning") == Some(&json!(false)) {
                    return doc;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("the abandoned run releases the lock");

    assert_eq!(state.field("lastRunID"), Some(&json!("run-1")));
    assert_eq!(
        store.document("items/a").unwrap().field("processed"),
        Some(&json!(true))
    );
}
