//! Handlers for queue state inspection and the operator disable flag.

use axum::extract::{Query, State};
use axum::Json;
use runlatch_core::state::StateDocument;
use serde::Deserialize;

use crate::error::AppResult;
use crate::handlers::resolve_queue;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub path: String,
    pub force_run_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetDisabled {
    pub path: String,
    pub force_run_path: Option<String>,
    pub disabled: bool,
}

/// GET /api/v1/queues/state?path=...
///
/// `data` is `null` until the queue has run or been configured once.
pub async fn get_state(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> AppResult<Json<DataResponse<Option<StateDocument>>>> {
    let queue = resolve_queue(&query.path, query.force_run_path.as_deref())?;
    let doc = queue.read_state(state.store.as_ref()).await?;
    Ok(Json(DataResponse { data: doc }))
}

/// PUT /api/v1/queues/disabled
///
/// A disabled queue refuses every run until re-enabled. A run already in
/// progress is not interrupted.
pub async fn set_disabled(
    State(state): State<AppState>,
    Json(input): Json<SetDisabled>,
) -> AppResult<Json<DataResponse<StateDocument>>> {
    let queue = resolve_queue(&input.path, input.force_run_path.as_deref())?;
    let doc = queue.set_disabled(state.store.as_ref(), input.disabled).await?;
    Ok(Json(DataResponse { data: doc }))
}
