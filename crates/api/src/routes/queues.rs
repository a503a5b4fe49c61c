use axum::routing::{get, put};
use axum::Router;

use crate::handlers::queues;
use crate::state::AppState;

/// Routes mounted at `/queues`.
///
/// ```text
/// GET    /state           -> get_state
/// PUT    /disabled        -> set_disabled
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/state", get(queues::get_state))
        .route("/disabled", put(queues::set_disabled))
}
