//! Validated queue handle and its operator-facing state operations.

use std::sync::Arc;

use futures::FutureExt;

use crate::error::{CoreError, QueueError};
use crate::paths;
use crate::processor::Processor;
use crate::state::{fields, StateDocument};
use crate::store::{run_transaction, DocumentStore, Fields};
use crate::worker::Worker;

/// Attempt budget for operator writes to the state document.
const ADMIN_MAX_ATTEMPTS: u32 = 5;

/// Immutable handle bound to a state document and a force-run document.
///
/// `Queue::default()` is an unbound placeholder; it refuses to build
/// processors until replaced by a validated queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Queue {
    state_path: String,
    force_run_path: String,
    collection: String,
}

impl Queue {
    /// Bind a queue to a collection or document path, deriving the
    /// force-run document from the state document.
    pub fn new(path: &str) -> Result<Self, CoreError> {
        Self::from_resolved(paths::resolve(path, None)?)
    }

    /// Bind a queue with a caller-chosen force-run document.
    pub fn with_force_run_path(path: &str, force_run_path: &str) -> Result<Self, CoreError> {
        Self::from_resolved(paths::resolve(path, Some(force_run_path))?)
    }

    fn from_resolved(resolved: paths::ResolvedPaths) -> Result<Self, CoreError> {
        let collection = paths::parent(&resolved.state_path)
            .ok_or_else(|| CoreError::InvalidPath(resolved.state_path.clone()))?
            .to_string();
        Ok(Self {
            state_path: resolved.state_path,
            force_run_path: resolved.force_run_path,
            collection,
        })
    }

    pub fn state_path(&self) -> &str {
        &self.state_path
    }

    pub fn force_run_path(&self) -> &str {
        &self.force_run_path
    }

    /// Collection the state document lives in.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_initialized(&self) -> bool {
        !self.state_path.is_empty()
    }

    /// Bind workers, in priority order, into a processor for this queue.
    pub fn processor(
        &self,
        store: Arc<dyn DocumentStore>,
        workers: Vec<Arc<dyn Worker>>,
    ) -> Result<Processor, CoreError> {
        if !self.is_initialized() {
            return Err(CoreError::NotInitialized);
        }
        if workers.is_empty() {
            return Err(CoreError::Validation(
                "A processor needs at least one worker".to_string(),
            ));
        }
        Ok(Processor::new(self.clone(), store, workers))
    }

    /// Read the committed state document, if it exists yet.
    pub async fn read_state(
        &self,
        store: &dyn DocumentStore,
    ) -> Result<Option<StateDocument>, QueueError> {
        if !self.is_initialized() {
            return Err(QueueError::StateMissing);
        }
        let mut tx = store.begin().await?;
        let doc = tx.get(&self.state_path).await;
        tx.rollback().await?;

        Ok(doc?.map(|doc| doc.decode()).transpose()?)
    }

    /// Set or clear the operator `disabled` flag.
    ///
    /// A disabled queue refuses every acquisition until cleared. The state
    /// document is created idle if it does not exist yet.
    pub async fn set_disabled(
        &self,
        store: &dyn DocumentStore,
        disabled: bool,
    ) -> Result<StateDocument, QueueError> {
        let state_path = self.state_path.clone();
        let force_run_path = self.force_run_path.clone();

        run_transaction(store, ADMIN_MAX_ATTEMPTS, |tx| {
            let state_path = state_path.clone();
            let force_run_path = force_run_path.clone();
            let disabled = disabled;
            async move {
                if tx.get(&state_path).await?.is_some() {
                    tx.update(&state_path, Fields::new().with(fields::DISABLED, disabled))
                        .await?;
                } else {
                    let idle = Fields::new()
                        .with(fields::IS_RUNNING, false)
                        .with(fields::LAST_RUN_ID, "")
                        .with(fields::DISABLED, disabled)
                        .with(fields::FORCE_RUN_REF, force_run_path);
                    tx.create(&state_path, idle).await?;
                }
                Ok::<(), QueueError>(())
            }
            .boxed()
        })
        .await?;

        tracing::info!(queue = %self.state_path, disabled, "Queue disabled flag updated");

        self.read_state(store).await?.ok_or(QueueError::StateMissing)
    }
}
