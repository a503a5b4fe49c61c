use axum::routing::post;
use axum::Router;

use crate::handlers::runs;
use crate::state::AppState;

/// Routes mounted at `/runs`.
///
/// ```text
/// POST   /                -> trigger_run
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(runs::trigger_run))
}
