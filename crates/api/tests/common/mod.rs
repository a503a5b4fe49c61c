#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use runlatch_api::config::ServerConfig;
use runlatch_api::router::build_app_router;
use runlatch_api::state::AppState;
use runlatch_core::memory::MemoryStore;
use runlatch_core::store::DocumentStore;
use runlatch_events::EventBus;
use serde_json::Value;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        db_max_connections: 1,
    }
}

/// Build the full application router over the given in-memory store.
pub fn build_test_app(store: MemoryStore) -> Router {
    build_test_app_with_bus(store, Arc::new(EventBus::default()))
}

pub fn build_test_app_with_bus(store: MemoryStore, event_bus: Arc<EventBus>) -> Router {
    let state = AppState {
        store: Arc::new(store),
        config: Arc::new(test_config()),
        event_bus,
    };
    build_app_router(state)
}

/// Build the router over an arbitrary store and configuration.
pub fn build_test_app_with_store(store: Arc<dyn DocumentStore>, config: ServerConfig) -> Router {
    let state = AppState {
        store,
        config: Arc::new(config),
        event_bus: Arc::new(EventBus::default()),
    };
    build_app_router(state)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn send_json(app: Router, method: Method, uri: &str, body: Value) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
