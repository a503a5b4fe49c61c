use std::sync::Arc;
use std::time::Duration;

use runlatch_core::store::DocumentStore;
use runlatch_db::{ChangeListener, PgDocumentStore};
use runlatch_events::{EventBus, RunJournal};
use runlatch_worker::{queue_processors, telemetry, Sweeper, TriggerDispatcher, WorkerConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Notifications buffered between the listener and the dispatcher.
const CHANGE_BUFFER: usize = 1024;

/// Pause before retrying after the listener connection fails.
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    telemetry::init("runlatch_worker=debug,runlatch_core=debug");

    // --- Configuration ---
    let config = WorkerConfig::from_env().expect("Invalid worker configuration");
    tracing::info!(queues = ?config.queue_paths, "Loaded worker configuration");

    // --- Database ---
    let pool = runlatch_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");
    runlatch_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    runlatch_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    let store: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(pool.clone()));
    let processors =
        queue_processors(&config.queue_paths, store).expect("QUEUE_PATHS contains an invalid path");

    // --- Event bus ---
    let bus = Arc::new(EventBus::default());
    let journal_handle = tokio::spawn(RunJournal::run(bus.subscribe()));

    let cancel = CancellationToken::new();

    // --- Change listener ---
    let mut listener = ChangeListener::connect(&pool)
        .await
        .expect("Failed to listen for document changes");
    let (change_tx, change_rx) = mpsc::channel(CHANGE_BUFFER);
    let listener_cancel = cancel.clone();
    let listener_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = listener_cancel.cancelled() => break,
                change = listener.recv() => match change {
                    Ok(change) => {
                        if change_tx.send(change).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Change listener failed, retrying");
                        tokio::time::sleep(LISTENER_RETRY_DELAY).await;
                    }
                },
            }
        }
    });

    // --- Dispatcher ---
    let dispatcher = TriggerDispatcher::new(processors.clone(), Arc::clone(&bus));
    let dispatcher_cancel = cancel.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(change_rx, dispatcher_cancel).await;
    });

    // --- Sweeper ---
    let sweeper_handle = config.sweep_interval.map(|interval| {
        let sweeper = Sweeper::new(processors, Arc::clone(&bus), interval);
        let sweeper_cancel = cancel.clone();
        tokio::spawn(async move {
            sweeper.run(sweeper_cancel).await;
        })
    });

    tracing::info!("Worker started");

    shutdown_signal().await;

    // In-flight runs are awaited by the dispatcher so every held lock is
    // released before exit.
    cancel.cancel();
    let _ = listener_handle.await;
    let _ = dispatcher_handle.await;
    if let Some(handle) = sweeper_handle {
        let _ = handle.await;
    }

    drop(bus);
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
