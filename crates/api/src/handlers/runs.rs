//! Handlers for the `/runs` resource: run a queue once, now.

use axum::extract::State;
use axum::Json;
use runlatch_core::types::new_run_id;
use runlatch_events::bus::{RunEvent, RunOutcome};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::handlers::resolve_queue;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TriggerRun {
    pub path: String,
    pub force_run_path: Option<String>,
    /// Caller-chosen run ID; a fresh one is generated when absent.
    pub run_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub outcome: RunOutcome,
}

/// POST /api/v1/runs
///
/// Execute one full run of the queue with the bundled digest worker.
/// Returns 409 when another run holds the lock and 423 when the queue is
/// disabled.
pub async fn trigger_run(
    State(state): State<AppState>,
    Json(input): Json<TriggerRun>,
) -> AppResult<Json<DataResponse<RunResult>>> {
    let queue = resolve_queue(&input.path, input.force_run_path.as_deref())?;
    let processor = runlatch_worker::digest_processor(&queue, state.store.clone())?;

    let run_id = match input.run_id {
        Some(run_id) if run_id.trim().is_empty() => {
            return Err(AppError::BadRequest("run_id must not be blank".to_string()));
        }
        Some(run_id) => run_id,
        None => new_run_id(),
    };

    // Detached so `stop` still runs when the request future is dropped
    // (timeout or client disconnect).
    let task = {
        let bus = state.event_bus.clone();
        let state_path = queue.state_path().to_string();
        let run_id = run_id.clone();
        tokio::spawn(async move {
            let result = processor.process(&run_id).await;
            let event = RunEvent::from_result(state_path, &run_id, &result);
            bus.publish(event.clone());
            result.map(|()| event.outcome)
        })
    };

    let outcome = task
        .await
        .map_err(|e| AppError::Internal(format!("Run task failed: {e}")))??;

    tracing::info!(queue = %queue.state_path(), run_id = %run_id, "Run triggered over HTTP");

    Ok(Json(DataResponse {
        data: RunResult {
            run_id,
            outcome,
        },
    }))
}
