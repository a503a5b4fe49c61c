//! Trigger adapter daemon: turns store change notifications and a periodic
//! sweep into queue runs.

pub mod config;
pub mod digest;
pub mod dispatcher;
pub mod sweeper;
pub mod telemetry;

use std::sync::Arc;

use runlatch_core::error::CoreError;
use runlatch_core::processor::Processor;
use runlatch_core::queue::Queue;
use runlatch_core::store::DocumentStore;
use runlatch_core::worker::Worker;

pub use config::WorkerConfig;
pub use digest::CollectionDigestWorker;
pub use dispatcher::TriggerDispatcher;
pub use sweeper::Sweeper;

/// Build a digest processor for each logical queue path.
pub fn queue_processors(
    paths: &[String],
    store: Arc<dyn DocumentStore>,
) -> Result<Vec<Processor>, CoreError> {
    paths
        .iter()
        .map(|path| digest_processor(&Queue::new(path)?, Arc::clone(&store)))
        .collect()
}

/// Bind a queue to the bundled [`CollectionDigestWorker`].
pub fn digest_processor(queue: &Queue, store: Arc<dyn DocumentStore>) -> Result<Processor, CoreError> {
    let worker: Arc<dyn Worker> = Arc::new(CollectionDigestWorker::new(queue));
    queue.processor(store, vec![worker])
}
