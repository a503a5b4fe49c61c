//! Change-notification trigger.
//!
//! Receives committed-write notifications from the store, classifies each
//! against every configured queue, and runs the matching processors. Each
//! notification is handled on its own task so a long run never blocks the
//! stream; the lock on the state document keeps runs of one queue
//! exclusive.

use std::sync::Arc;

use futures::future::join_all;
use runlatch_core::processor::Processor;
use runlatch_core::trigger::{classify, ChangeNotification, TriggerDecision};
use runlatch_core::types::new_run_id;
use runlatch_events::bus::{EventBus, RunEvent, RunOutcome};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Run one queue once under a fresh run ID and publish the outcome.
pub async fn run_queue(processor: &Processor, bus: &EventBus) -> RunEvent {
    let queue = processor.queue().state_path();
    let run_id = new_run_id();

    let result = processor.process(&run_id).await;
    let event = RunEvent::from_result(queue, &run_id, &result);

    if event.outcome == RunOutcome::Failed {
        if let Err(e) = &result {
            tracing::error!(queue, run_id = %run_id, stage = %e.stage, error = %e, "Run failed");
        }
    }

    bus.publish(event.clone());
    event
}

/// Dispatches store change notifications to queue processors.
#[derive(Clone)]
pub struct TriggerDispatcher {
    processors: Arc<[Processor]>,
    bus: Arc<EventBus>,
}

impl TriggerDispatcher {
    pub fn new(processors: Vec<Processor>, bus: Arc<EventBus>) -> Self {
        Self {
            processors: processors.into(),
            bus,
        }
    }

    /// Run every processor the notification is relevant to.
    ///
    /// Returns one event per run attempted; empty when the notification
    /// matched no queue.
    pub async fn dispatch(&self, change: &ChangeNotification) -> Vec<RunEvent> {
        let matching: Vec<&Processor> = self
            .processors
            .iter()
            .filter(|processor| {
                let decision = classify(processor.queue(), change);
                if decision == TriggerDecision::ForceRun {
                    tracing::debug!(
                        queue = %processor.queue().state_path(),
                        path = %change.path,
                        "Force-run signal received"
                    );
                }
                decision.should_run()
            })
            .collect();

        join_all(
            matching
                .into_iter()
                .map(|processor| run_queue(processor, &self.bus)),
        )
        .await
    }

    /// Consume notifications until cancelled or the stream closes.
    ///
    /// Runs already in flight are awaited before returning, so every
    /// acquired lock is released.
    pub async fn run(&self, mut changes: mpsc::Receiver<ChangeNotification>, cancel: CancellationToken) {
        let mut in_flight: JoinSet<Vec<RunEvent>> = JoinSet::new();
        tracing::info!(queues = self.processors.len(), "Trigger dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Trigger dispatcher shutting down");
                    break;
                }
                change = changes.recv() => match change {
                    Some(change) => {
                        let dispatcher = self.clone();
                        in_flight.spawn(async move { dispatcher.dispatch(&change).await });
                    }
                    None => {
                        tracing::info!("Change stream closed, trigger dispatcher stopping");
                        break;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join_error(joined);
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            log_join_error(joined);
        }
    }
}

fn log_join_error(joined: Result<Vec<RunEvent>, tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Dispatch task failed");
    }
}

#[cfg(test)]
mod tests {
    use runlatch_core::memory::MemoryStore;
    use runlatch_core::store::DocumentStore;
    use runlatch_core::trigger::ChangeKind;

    use super::*;
    use crate::queue_processors;

    fn dispatcher(store: &MemoryStore, paths: &[&str]) -> TriggerDispatcher {
        let store: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        TriggerDispatcher::new(
            queue_processors(&paths, store).unwrap(),
            Arc::new(EventBus::default()),
        )
    }

    #[tokio::test]
    async fn new_items_run_only_their_queue() {
        let store = MemoryStore::new();
        let dispatcher = dispatcher(&store, &["items", "orders"]);

        let events = dispatcher
            .dispatch(&ChangeNotification::new("items/a", ChangeKind::Create))
            .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].queue, "items/$queue");
        assert_eq!(events[0].outcome, RunOutcome::Completed);
        assert!(store.document("orders/$queue").is_none());
    }

    #[tokio::test]
    async fn irrelevant_changes_run_nothing() {
        let store = MemoryStore::new();
        let dispatcher = dispatcher(&store, &["items"]);

        for change in [
            ChangeNotification::new("items/a", ChangeKind::Update),
            ChangeNotification::new("items/$digest", ChangeKind::Create),
            ChangeNotification::new("items/$queue", ChangeKind::Update),
        ] {
            assert!(dispatcher.dispatch(&change).await.is_empty());
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn force_run_signal_runs_the_queue() {
        let store = MemoryStore::new();
        let dispatcher = dispatcher(&store, &["items"]);
        let mut rx = dispatcher.bus.subscribe();

        let events = dispatcher
            .dispatch(&ChangeNotification::new(
                "items/$queue/force/$run",
                ChangeKind::Update,
            ))
            .await;

        assert_eq!(events.len(), 1);
        assert_eq!(rx.recv().await.unwrap().run_id, events[0].run_id);
    }

    #[tokio::test]
    async fn held_lock_is_reported_as_skipped() {
        let store = MemoryStore::new();
        let dispatcher = dispatcher(&store, &["items"]);
        dispatcher.processors[0].run("other").start().await.unwrap();

        let events = dispatcher
            .dispatch(&ChangeNotification::new("items/a", ChangeKind::Create))
            .await;
        assert_eq!(events[0].outcome, RunOutcome::Skipped);
    }
}
