pub mod health;
pub mod queues;
pub mod runs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /runs                  trigger a run (POST)
/// /queues/state          inspect a queue's state document (GET)
/// /queues/disabled       set or clear the operator disable flag (PUT)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/runs", runs::router())
        .nest("/queues", queues::router())
}
