//! In-process transactional document store.
//!
//! Used by tests and local development. Transactions are optimistic: each
//! one remembers the version of every document it read and buffers its
//! writes, and commit applies the writes only if none of those documents
//! changed in the meantime. Committed writes are broadcast as
//! [`ChangeNotification`]s so trigger adapters can be exercised end-to-end.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::paths;
use crate::store::{Document, DocumentStore, Fields, Transaction};
use crate::trigger::{ChangeKind, ChangeNotification};
use crate::types::Timestamp;

/// Buffer capacity of the change-notification channel.
const DEFAULT_CHANGE_CAPACITY: usize = 1024;

/// Version reported for a document that does not exist.
const ABSENT: u64 = 0;

struct StoredDocument {
    data: Map<String, Value>,
    version: u64,
    update_time: Timestamp,
}

#[derive(Default)]
struct Committed {
    docs: BTreeMap<String, StoredDocument>,
    last_version: u64,
}

impl Committed {
    fn version_of(&self, path: &str) -> u64 {
        self.docs.get(path).map_or(ABSENT, |doc| doc.version)
    }

    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }
}

/// Shared in-memory store. Clones share the same documents.
#[derive(Clone)]
pub struct MemoryStore {
    committed: Arc<Mutex<Committed>>,
    changes: broadcast::Sender<ChangeNotification>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(DEFAULT_CHANGE_CAPACITY);
        Self {
            committed: Arc::new(Mutex::new(Committed::default())),
            changes,
        }
    }

    /// Subscribe to notifications for every committed write.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.changes.subscribe()
    }

    /// Committed snapshot of a document, outside any transaction.
    pub fn document(&self, path: &str) -> Option<Document> {
        let committed = lock(&self.committed);
        committed.docs.get(path).map(|doc| Document {
            path: path.to_string(),
            data: doc.data.clone(),
            update_time: doc.update_time,
        })
    }

    /// Overwrite a document directly, as an external writer would.
    pub fn insert(&self, path: &str, data: Value) {
        let data = match data {
            Value::Object(map) => map,
            other => Map::from_iter([("value".to_string(), other)]),
        };
        let kind = {
            let mut committed = lock(&self.committed);
            let kind = if committed.docs.contains_key(path) {
                ChangeKind::Update
            } else {
                ChangeKind::Create
            };
            let version = committed.next_version();
            committed.docs.insert(
                path.to_string(),
                StoredDocument {
                    data,
                    version,
                    update_time: Utc::now(),
                },
            );
            kind
        };
        let _ = self.changes.send(ChangeNotification::new(path, kind));
    }

    pub fn len(&self) -> usize {
        lock(&self.committed).docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            committed: Arc::clone(&self.committed),
            changes: self.changes.clone(),
            now: Utc::now(),
            reads: HashMap::new(),
            writes: BTreeMap::new(),
            finished: false,
        }))
    }
}

/// The mutex only models the store's atomic commit; it is never held
/// across an await point.
fn lock(committed: &Mutex<Committed>) -> MutexGuard<'_, Committed> {
    committed.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

struct MemoryTransaction {
    committed: Arc<Mutex<Committed>>,
    changes: broadcast::Sender<ChangeNotification>,
    now: Timestamp,
    /// Version of each document as first observed by this transaction.
    reads: HashMap<String, u64>,
    /// Pending content per path; `None` means deleted.
    writes: BTreeMap<String, Option<Map<String, Value>>>,
    finished: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            Err(StoreError::Finished)
        } else {
            Ok(())
        }
    }

    /// Current content of `path` as seen by this transaction.
    fn view(&mut self, path: &str) -> Option<(Map<String, Value>, Timestamp)> {
        if let Some(pending) = self.writes.get(path) {
            return pending.clone().map(|data| (data, self.now));
        }

        let committed = lock(&self.committed);
        self.reads
            .entry(path.to_string())
            .or_insert_with(|| committed.version_of(path));
        committed
            .docs
            .get(path)
            .map(|doc| (doc.data.clone(), doc.update_time))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, path: &str) -> Result<Option<Document>, StoreError> {
        self.ensure_open()?;
        Ok(self.view(path).map(|(data, update_time)| Document {
            path: path.to_string(),
            data,
            update_time,
        }))
    }

    async fn list(&mut self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.ensure_open()?;

        let mut found: BTreeMap<String, Document> = BTreeMap::new();
        {
            let committed = lock(&self.committed);
            for (path, doc) in &committed.docs {
                if paths::parent(path) != Some(collection) {
                    continue;
                }
                self.reads.entry(path.clone()).or_insert(doc.version);
                found.insert(
                    path.clone(),
                    Document {
                        path: path.clone(),
                        data: doc.data.clone(),
                        update_time: doc.update_time,
                    },
                );
            }
        }

        for (path, pending) in &self.writes {
            if paths::parent(path) != Some(collection) {
                continue;
            }
            match pending {
                Some(data) => {
                    found.insert(
                        path.clone(),
                        Document {
                            path: path.clone(),
                            data: data.clone(),
                            update_time: self.now,
                        },
                    );
                }
                None => {
                    found.remove(path);
                }
            }
        }

        Ok(found.into_values().collect())
    }

    async fn create(&mut self, path: &str, fields: Fields) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.view(path).is_some() {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        self.writes
            .insert(path.to_string(), Some(fields.to_object(self.now)));
        Ok(())
    }

    async fn update(&mut self, path: &str, fields: Fields) -> Result<(), StoreError> {
        self.ensure_open()?;
        let Some((mut data, _)) = self.view(path) else {
            return Err(StoreError::NotFound(path.to_string()));
        };
        data.extend(fields.to_object(self.now));
        self.writes.insert(path.to_string(), Some(data));
        Ok(())
    }

    async fn set(&mut self, path: &str, fields: Fields) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.writes
            .insert(path.to_string(), Some(fields.to_object(self.now)));
        Ok(())
    }

    async fn delete(&mut self, path: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.writes.insert(path.to_string(), None);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.finished = true;

        let mut notifications = Vec::with_capacity(self.writes.len());
        {
            let mut committed = lock(&self.committed);

            for (path, seen) in &self.reads {
                if committed.version_of(path) != *seen {
                    return Err(StoreError::Conflict(path.clone()));
                }
            }

            for (path, pending) in std::mem::take(&mut self.writes) {
                match pending {
                    Some(data) => {
                        let kind = if committed.docs.contains_key(&path) {
                            ChangeKind::Update
                        } else {
                            ChangeKind::Create
                        };
                        let version = committed.next_version();
                        committed.docs.insert(
                            path.clone(),
                            StoredDocument {
                                data,
                                version,
                                update_time: self.now,
                            },
                        );
                        notifications.push(ChangeNotification::new(path, kind));
                    }
                    None => {
                        if committed.docs.remove(&path).is_some() {
                            notifications.push(ChangeNotification::new(path, ChangeKind::Delete));
                        }
                    }
                }
            }
        }

        for notification in notifications {
            // Only fails when nobody is subscribed.
            let _ = self.changes.send(notification);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.writes.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
