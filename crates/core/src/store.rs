//! Contract of the transactional document store collaborator.
//!
//! The store provides single-document atomic read-modify-write inside a
//! transaction, a create-if-absent primitive, and server-assigned
//! timestamps. [`run_transaction`] adds the retry-on-conflict loop with a
//! caller-chosen attempt budget.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{QueueError, StoreError};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// A value written to a document field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Replaced by the store's own clock when the write is applied.
    ServerTimestamp,
}

impl FieldValue {
    /// Materialize the value using the transaction's server time.
    pub fn resolve(&self, now: Timestamp) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::ServerTimestamp => timestamp_value(now),
        }
    }
}

/// Encode a timestamp the same way `serde` encodes [`Timestamp`] fields.
pub fn timestamp_value(ts: Timestamp) -> Value {
    serde_json::to_value(ts).unwrap_or(Value::Null)
}

/// An ordered set of field writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(BTreeMap<String, FieldValue>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), FieldValue::Value(value.into()));
        self
    }

    pub fn with_server_timestamp(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into(), FieldValue::ServerTimestamp);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    /// Resolve every field into a JSON object.
    pub fn to_object(&self, now: Timestamp) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(name, value)| (name.clone(), value.resolve(now)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A document snapshot read inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: String,
    pub data: Map<String, Value>,
    pub update_time: Timestamp,
}

impl Document {
    /// Decode the document body into a typed model.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|e| {
            StoreError::Decode {
                path: self.path.clone(),
                message: e.to_string(),
            }
        })
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// One open transaction. Every mutation must go through it.
///
/// Reads observe the transaction's own earlier writes. A transaction that
/// is neither committed nor rolled back is discarded.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, path: &str) -> Result<Option<Document>, StoreError>;

    /// Direct child documents of `collection`.
    async fn list(&mut self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Create a document, failing with [`StoreError::AlreadyExists`] if present.
    async fn create(&mut self, path: &str, fields: Fields) -> Result<(), StoreError>;

    /// Merge fields into an existing document, failing with
    /// [`StoreError::NotFound`] if absent.
    async fn update(&mut self, path: &str, fields: Fields) -> Result<(), StoreError>;

    /// Create or overwrite a document.
    async fn set(&mut self, path: &str, fields: Fields) -> Result<(), StoreError>;

    async fn delete(&mut self, path: &str) -> Result<(), StoreError>;

    /// Apply all writes atomically, or fail with [`StoreError::Conflict`].
    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// A client for a transactional document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

// ---------------------------------------------------------------------------
// Transaction runner
// ---------------------------------------------------------------------------

/// Run `body` inside a transaction, retrying on write conflicts.
///
/// The body runs at most `max_attempts` times. Conflicts from the body or
/// from commit trigger another attempt while the budget lasts; any other
/// error is returned straight away after rolling back.
pub async fn run_transaction<F>(
    store: &dyn DocumentStore,
    max_attempts: u32,
    mut body: F,
) -> Result<(), QueueError>
where
    F: for<'t> FnMut(&'t mut dyn Transaction) -> BoxFuture<'t, Result<(), QueueError>> + Send,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let mut tx = store.begin().await?;

        let result = body(tx.as_mut()).await;
        let outcome = match result {
            Ok(()) => tx.commit().await.map_err(QueueError::from),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Transaction rollback failed");
                }
                Err(err)
            }
        };

        match outcome {
            Ok(()) => return Ok(()),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::debug!(attempt, max_attempts, error = %err, "Retrying transaction");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
