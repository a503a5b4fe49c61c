//! The unit of work a queue coordinates.

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::store::Transaction;

/// Work-specific logic plugged into a [`Processor`](crate::processor::Processor).
///
/// Both operations receive the live transaction of the stage they run in.
/// Writes made through it commit atomically with the lock-ownership check,
/// and reads through it take part in the store's conflict detection.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Perform the unit of work.
    async fn execute(&self, tx: &mut dyn Transaction) -> Result<(), WorkerError>;

    /// Whether work arrived during this run that warrants a trailing-edge
    /// re-run.
    async fn needs_another_run(&self, tx: &mut dyn Transaction) -> Result<bool, WorkerError>;
}
