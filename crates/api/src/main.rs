use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use runlatch_api::config::ServerConfig;
use runlatch_api::router::build_app_router;
use runlatch_api::state::AppState;
use runlatch_db::PgDocumentStore;
use runlatch_events::{EventBus, RunJournal};
use runlatch_worker::telemetry;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    telemetry::init("runlatch_api=debug,runlatch_core=debug,tower_http=debug");

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = runlatch_db::create_pool(&database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    runlatch_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    runlatch_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let journal_handle = tokio::spawn(RunJournal::run(event_bus.subscribe()));

    // --- App state ---
    let state = AppState {
        store: Arc::new(PgDocumentStore::new(pool)),
        config: Arc::new(config.clone()),
        event_bus: Arc::clone(&event_bus),
    };

    let app = build_app_router(state);

    let addr = SocketAddr::new(config.host.parse().expect("Invalid HOST"), config.port);
    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // The router (and its state) is gone once serve returns; dropping the
    // last bus handle closes the journal.
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), journal_handle).await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
