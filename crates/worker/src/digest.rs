//! Bundled worker that processes a queue's collection and keeps a digest.
//!
//! Every direct child of the collection is a work item. An item is pending
//! until it carries `processed: true`. A run marks every pending item as
//! processed and rewrites the `$digest` document with the counts.

use async_trait::async_trait;
use runlatch_core::error::WorkerError;
use runlatch_core::paths;
use runlatch_core::queue::Queue;
use runlatch_core::store::{Document, Fields, Transaction};
use runlatch_core::worker::Worker;
use serde_json::Value;

pub const DIGEST_DOCUMENT_NAME: &str = "$digest";

pub const PROCESSED: &str = "processed";
pub const PROCESSED_AT: &str = "processedAt";

pub const PROCESSED_COUNT: &str = "processedCount";
pub const TOTAL_COUNT: &str = "totalCount";
pub const UPDATED_AT: &str = "updatedAt";

pub struct CollectionDigestWorker {
    collection: String,
    digest_path: String,
}

impl CollectionDigestWorker {
    pub fn new(queue: &Queue) -> Self {
        let collection = queue.collection().to_string();
        let digest_path = format!("{collection}/{DIGEST_DOCUMENT_NAME}");
        Self {
            collection,
            digest_path,
        }
    }

    pub fn digest_path(&self) -> &str {
        &self.digest_path
    }

    async fn items(&self, tx: &mut dyn Transaction) -> Result<Vec<Document>, WorkerError> {
        let docs = tx.list(&self.collection).await?;
        Ok(docs
            .into_iter()
            .filter(|doc| !paths::is_reserved(&doc.path))
            .collect())
    }
}

fn is_pending(doc: &Document) -> bool {
    doc.field(PROCESSED) != Some(&Value::Bool(true))
}

#[async_trait]
impl Worker for CollectionDigestWorker {
    async fn execute(&self, tx: &mut dyn Transaction) -> Result<(), WorkerError> {
        let items = self.items(&mut *tx).await?;
        let total = items.len();

        let mut processed = 0usize;
        for item in items.iter().filter(|doc| is_pending(doc)) {
            tx.update(
                &item.path,
                Fields::new()
                    .with(PROCESSED, true)
                    .with_server_timestamp(PROCESSED_AT),
            )
            .await?;
            processed += 1;
        }

        // processedCount covers this run only; totalCount is the collection.
        tx.set(
            &self.digest_path,
            Fields::new()
                .with(PROCESSED_COUNT, processed)
                .with(TOTAL_COUNT, total)
                .with_server_timestamp(UPDATED_AT),
        )
        .await?;

        tracing::debug!(collection = %self.collection, processed, total, "Collection digest updated");
        Ok(())
    }

    async fn needs_another_run(&self, tx: &mut dyn Transaction) -> Result<bool, WorkerError> {
        Ok(self.items(tx).await?.iter().any(is_pending))
    }
}
