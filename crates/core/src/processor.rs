//! The run protocol: acquire, execute, release, maybe reschedule.
//!
//! Each stage is one independent transaction against the queue's state
//! document. Mutual exclusion comes entirely from the store's atomic
//! read-modify-write; nothing here takes a local lock, since any number of
//! processes may run the same queue concurrently.
//!
//! ```text
//! Idle --start--> Acquiring --handle--> Executing --stop--> Released --forceRun--> Rescheduled
//! ```

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;

use crate::error::{ProcessError, QueueError, Stage};
use crate::queue::Queue;
use crate::state::{ForceRunSignal, StateDocument};
use crate::store::{run_transaction, DocumentStore, Transaction};
use crate::types::RunId;
use crate::worker::Worker;

// ---------------------------------------------------------------------------
// Attempt budgets
// ---------------------------------------------------------------------------

/// Acquisition never retries: a retried acquire could take the lock on
/// behalf of a caller whose view is stale.
pub const START_MAX_ATTEMPTS: u32 = 1;

pub const HANDLE_MAX_ATTEMPTS: u32 = 5;

pub const STOP_MAX_ATTEMPTS: u32 = 5;

pub const FORCE_RUN_MAX_ATTEMPTS: u32 = 2;

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// A queue bound to a store and its workers. Cheap to clone.
#[derive(Clone)]
pub struct Processor {
    queue: Queue,
    store: Arc<dyn DocumentStore>,
    workers: Arc<[Arc<dyn Worker>]>,
}

impl Processor {
    pub(crate) fn new(
        queue: Queue,
        store: Arc<dyn DocumentStore>,
        workers: Vec<Arc<dyn Worker>>,
    ) -> Self {
        Self {
            queue,
            store,
            workers: workers.into(),
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Prepare one run attempt without executing it.
    pub fn run(&self, run_id: impl Into<RunId>) -> Run {
        Run {
            run_id: run_id.into(),
            queue: self.queue.clone(),
            store: Arc::clone(&self.store),
            workers: Arc::clone(&self.workers),
        }
    }

    /// Execute one full run cycle under `run_id`.
    ///
    /// `run_id` must be unique among concurrently dispatched runs.
    pub async fn process(&self, run_id: &str) -> Result<(), ProcessError> {
        self.run(run_id).execute().await
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("queue", &self.queue)
            .field("workers", &self.workers.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// One attempted run. Lives only for the duration of a `process` call.
#[derive(Clone)]
pub struct Run {
    run_id: RunId,
    queue: Queue,
    store: Arc<dyn DocumentStore>,
    workers: Arc<[Arc<dyn Worker>]>,
}

impl Run {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Sequence start, handle, stop and forceRun.
    ///
    /// A failed start ends the run. A failed handle still releases the lock
    /// and then surfaces the handle error; a stop failure on top of it is
    /// only logged. forceRun runs only when both handle and stop succeeded.
    pub async fn execute(&self) -> Result<(), ProcessError> {
        let queue = self.queue.state_path();
        let run_id = self.run_id.as_str();
        tracing::debug!(queue, run_id, "Run starting");

        self.start()
            .await
            .map_err(|e| ProcessError::new(Stage::Start, e))?;

        let handled = self
            .handle()
            .await
            .map_err(|e| ProcessError::new(Stage::Handle, e));
        let stopped = self
            .stop()
            .await
            .map_err(|e| ProcessError::new(Stage::Stop, e));

        match (handled, stopped) {
            (Err(handle_err), Err(stop_err)) => {
                tracing::warn!(queue, run_id, error = %stop_err, "Failed to release queue after failed run");
                return Err(handle_err);
            }
            (Err(err), Ok(())) | (Ok(()), Err(err)) => return Err(err),
            (Ok(()), Ok(())) => {}
        }

        self.force_run()
            .await
            .map_err(|e| ProcessError::new(Stage::ForceRun, e))?;

        tracing::debug!(queue, run_id, "Run completed");
        Ok(())
    }

    /// Acquire the lock, creating the state document on first use.
    ///
    /// Losing a write race to a concurrent acquirer surfaces as
    /// [`QueueError::AlreadyRunning`].
    pub async fn start(&self) -> Result<(), QueueError> {
        let result = run_transaction(self.store.as_ref(), START_MAX_ATTEMPTS, |tx| {
            let run = self.clone();
            async move { run.acquire(tx).await }.boxed()
        })
        .await;

        match result {
            Err(err) if err.is_retryable() => {
                tracing::debug!(
                    queue = %self.queue.state_path(),
                    run_id = %self.run_id,
                    error = %err,
                    "Lost acquisition race"
                );
                Err(QueueError::AlreadyRunning)
            }
            other => other,
        }
    }

    /// Execute the workers while still owning the lock.
    pub async fn handle(&self) -> Result<(), QueueError> {
        run_transaction(self.store.as_ref(), HANDLE_MAX_ATTEMPTS, |tx| {
            let run = self.clone();
            async move { run.execute_workers(tx).await }.boxed()
        })
        .await
    }

    /// Release the lock.
    pub async fn stop(&self) -> Result<(), QueueError> {
        run_transaction(self.store.as_ref(), STOP_MAX_ATTEMPTS, |tx| {
            let run = self.clone();
            async move { run.release(tx).await }.boxed()
        })
        .await
    }

    /// Request a trailing-edge re-run if a worker reports more work.
    pub async fn force_run(&self) -> Result<(), QueueError> {
        run_transaction(self.store.as_ref(), FORCE_RUN_MAX_ATTEMPTS, |tx| {
            let run = self.clone();
            async move { run.signal_rerun(tx).await }.boxed()
        })
        .await
    }

    // -- transaction bodies --------------------------------------------------

    async fn acquire(&self, tx: &mut dyn Transaction) -> Result<(), QueueError> {
        let state_path = self.queue.state_path();

        let Some(doc) = tx.get(state_path).await? else {
            let fields = StateDocument::acquired_fields(&self.run_id, self.queue.force_run_path());
            tx.create(state_path, fields).await?;
            return Ok(());
        };

        let state: StateDocument = doc.decode()?;
        if state.disabled {
            return Err(QueueError::QueueDisabled);
        }
        if state.is_running {
            tracing::debug!(
                queue = %state_path,
                run_id = %self.run_id,
                holder = %state.last_run_id,
                "Queue already held"
            );
            return Err(QueueError::AlreadyRunning);
        }

        tx.update(state_path, StateDocument::reacquired_fields(&self.run_id))
            .await?;
        Ok(())
    }

    async fn execute_workers(&self, tx: &mut dyn Transaction) -> Result<(), QueueError> {
        self.owned_state(&mut *tx).await?;
        for worker in self.workers.iter() {
            worker
                .execute(&mut *tx)
                .await
                .map_err(QueueError::Worker)?;
        }
        Ok(())
    }

    async fn release(&self, tx: &mut dyn Transaction) -> Result<(), QueueError> {
        self.owned_state(&mut *tx).await?;
        tx.update(self.queue.state_path(), StateDocument::released_fields())
            .await?;
        Ok(())
    }

    async fn signal_rerun(&self, tx: &mut dyn Transaction) -> Result<(), QueueError> {
        if !self.needs_another_run(&mut *tx).await? {
            return Ok(());
        }

        let state_path = self.queue.state_path();
        let doc = tx.get(state_path).await?.ok_or(QueueError::StateMissing)?;
        let state: StateDocument = doc.decode()?;
        if state.last_run_id != self.run_id {
            return Err(QueueError::OwnershipLost {
                holder: state.last_run_id,
            });
        }
        if state.is_running {
            return Err(QueueError::AlreadyRunning);
        }
        let target = state
            .force_run_ref
            .ok_or(QueueError::MissingForceRunTarget)?;

        tx.set(&target, ForceRunSignal::fields(state_path)).await?;
        tracing::info!(queue = %state_path, run_id = %self.run_id, target = %target, "Trailing-edge re-run requested");
        Ok(())
    }

    /// Ask workers, in order, whether another run is needed.
    ///
    /// A worker error counts as "no further work", except store conflicts,
    /// which are handed back so the transaction is retried.
    async fn needs_another_run(&self, tx: &mut dyn Transaction) -> Result<bool, QueueError> {
        for worker in self.workers.iter() {
            match worker.needs_another_run(&mut *tx).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(err) => {
                    let err = QueueError::Worker(err);
                    if err.is_retryable() {
                        return Err(err);
                    }
                    tracing::warn!(queue = %self.queue.state_path(), run_id = %self.run_id, error = %err, "needs_another_run failed");
                }
            }
        }
        Ok(false)
    }

    /// Re-validate that this run still holds the lock.
    async fn owned_state(&self, tx: &mut dyn Transaction) -> Result<StateDocument, QueueError> {
        let doc = tx
            .get(self.queue.state_path())
            .await?
            .ok_or(QueueError::StateMissing)?;
        let state: StateDocument = doc.decode()?;
        if !state.is_running {
            return Err(QueueError::NotRunning);
        }
        if state.last_run_id != self.run_id {
            return Err(QueueError::OwnershipLost {
                holder: state.last_run_id,
            });
        }
        Ok(state)
    }
}

impl fmt::Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("run_id", &self.run_id)
            .field("queue", &self.queue)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
