use std::sync::Arc;

use runlatch_core::store::DocumentStore;
use runlatch_events::EventBus;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Document store every queue operation runs against.
    pub store: Arc<dyn DocumentStore>,
    pub config: Arc<ServerConfig>,
    /// Receives one outcome event per run triggered over HTTP.
    pub event_bus: Arc<EventBus>,
}
