//! Periodic trigger.
//!
//! Change notifications are at-most-once: anything published while the
//! listener is reconnecting is lost. The sweeper runs every queue on a
//! fixed period so such work is still picked up.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use runlatch_core::processor::Processor;
use runlatch_events::bus::{EventBus, RunEvent};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::run_queue;

pub struct Sweeper {
    processors: Vec<Processor>,
    bus: Arc<EventBus>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(processors: Vec<Processor>, bus: Arc<EventBus>, interval: Duration) -> Self {
        Self {
            processors,
            bus,
            interval,
        }
    }

    /// Run every queue once, concurrently.
    pub async fn sweep(&self) -> Vec<RunEvent> {
        join_all(
            self.processors
                .iter()
                .map(|processor| run_queue(processor, &self.bus)),
        )
        .await
    }

    /// Sweep on every tick until the cancellation token is triggered. The
    /// first sweep happens immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "Sweeper started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let events = self.sweep().await;
                    tracing::debug!(runs = events.len(), "Sweep finished");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use runlatch_core::memory::MemoryStore;
    use runlatch_core::store::DocumentStore;
    use runlatch_events::bus::RunOutcome;
    use serde_json::json;

    use super::*;
    use crate::queue_processors;

    fn sweeper(store: &MemoryStore, interval: Duration) -> Sweeper {
        let store: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let paths = vec!["items".to_string(), "orders".to_string()];
        Sweeper::new(
            queue_processors(&paths, store).unwrap(),
            Arc::new(EventBus::default()),
            interval,
        )
    }

    #[tokio::test]
    async fn sweep_runs_every_queue() {
        let store = MemoryStore::new();
        store.insert("orders/o1", json!({}));

        let events = sweeper(&store, Duration::from_secs(60)).sweep().await;

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.outcome == RunOutcome::Completed));
        assert_eq!(
            store.document("orders/o1").unwrap().field("processed"),
            Some(&json!(true))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let store = MemoryStore::new();
        let sweeper = sweeper(&store, Duration::from_secs(60));
        let mut rx = sweeper.bus.subscribe();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { sweeper.run(cancel).await }
        });

        // The immediate first tick sweeps both queues.
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        cancel.cancel();
        handle.await.unwrap();
        assert!(store.document("items/$queue").is_some());
    }
}
