use std::fmt;

/// Opaque error reported by a [`Worker`](crate::worker::Worker).
pub type WorkerError = Box<dyn std::error::Error + Send + Sync>;

/// Construction-time failures: bad input handed to the core by its caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Queue is not initialized")]
    NotInitialized,

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Failures reported by a transactional store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another transaction wrote something this one read. Retryable.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Failed to decode document {path}: {message}")]
    Decode { path: String, message: String },

    #[error("Transaction already finished")]
    Finished,

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the whole transaction body may succeed.
    ///
    /// A failed create-if-absent means another writer created the document
    /// after this transaction read it, which is a write conflict too.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::AlreadyExists(_))
    }
}

/// The failure taxonomy of a single run stage.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("The queue is disabled")]
    QueueDisabled,

    #[error("The queue is already running")]
    AlreadyRunning,

    #[error("The queue state document does not exist")]
    StateMissing,

    #[error("The queue is not running")]
    NotRunning,

    #[error("The queue is held by run {holder}")]
    OwnershipLost { holder: String },

    #[error("The queue state has no force-run reference")]
    MissingForceRunTarget,

    #[error("worker: {0}")]
    Worker(WorkerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueueError {
    /// Whether the store adapter should retry the transaction body.
    ///
    /// Worker errors are opaque, but a worker that bubbled up a store
    /// conflict from its own transactional reads is retried like any other.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_conflict(),
            Self::Worker(err) => err
                .downcast_ref::<StoreError>()
                .is_some_and(StoreError::is_conflict),
            _ => false,
        }
    }
}

/// One of the four independent transactions a run is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Start,
    Handle,
    Stop,
    ForceRun,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Handle => "handle",
            Self::Stop => "stop",
            Self::ForceRun => "forceRun",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by [`Processor::process`](crate::processor::Processor::process),
/// naming the stage that failed.
#[derive(Debug, thiserror::Error)]
#[error("run.{stage}: {source}")]
pub struct ProcessError {
    pub stage: Stage,
    #[source]
    pub source: QueueError,
}

impl ProcessError {
    pub fn new(stage: Stage, source: QueueError) -> Self {
        Self { stage, source }
    }

    /// Someone else holds the lock. Expected contention, not an alarm.
    pub fn is_already_running(&self) -> bool {
        matches!(self.source, QueueError::AlreadyRunning)
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.source, QueueError::QueueDisabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_are_retryable() {
        assert!(QueueError::Store(StoreError::Conflict("x".into())).is_retryable());
        assert!(QueueError::Store(StoreError::AlreadyExists("x".into())).is_retryable());
        assert!(!QueueError::Store(StoreError::NotFound("x".into())).is_retryable());
        assert!(!QueueError::AlreadyRunning.is_retryable());
    }

    #[test]
    fn worker_error_wrapping_conflict_is_retryable() {
        let err: WorkerError = Box::new(StoreError::Conflict("items/a".into()));
        assert!(QueueError::Worker(err).is_retryable());

        let err: WorkerError = "boom".into();
        assert!(!QueueError::Worker(err).is_retryable());
    }

    #[test]
    fn process_error_names_the_stage() {
        let err = ProcessError::new(Stage::ForceRun, QueueError::MissingForceRunTarget);
        assert_eq!(
            err.to_string(),
            "run.forceRun: The queue state has no force-run reference"
        );
        assert!(!err.is_already_running());
        assert!(ProcessError::new(Stage::Start, QueueError::AlreadyRunning).is_already_running());
    }
}
