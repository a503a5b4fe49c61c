//! Distributed run-exclusion for document-store-backed work queues.
//!
//! A [`Queue`] names a state document holding a lock flag. A
//! [`Processor`] binds the queue to a [`DocumentStore`] and one or more
//! [`Worker`]s and drives each run through four independent transactions:
//! acquire the lock, execute the workers, release the lock, and request a
//! trailing-edge re-run when the workers report pending work.

pub mod error;
pub mod memory;
pub mod paths;
pub mod processor;
pub mod queue;
pub mod state;
pub mod store;
pub mod trigger;
pub mod types;
pub mod worker;

pub use error::{CoreError, ProcessError, QueueError, Stage, StoreError, WorkerError};
pub use memory::MemoryStore;
pub use processor::{Processor, Run};
pub use queue::Queue;
pub use state::{ForceRunSignal, StateDocument};
pub use store::{run_transaction, Document, DocumentStore, FieldValue, Fields, Transaction};
pub use trigger::{classify, ChangeKind, ChangeNotification, TriggerDecision};
pub use types::{new_run_id, RunId, Timestamp};
pub use worker::Worker;
