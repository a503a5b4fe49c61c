//! Structured log of every run outcome.
//!
//! [`RunJournal`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! writes one log line per [`RunEvent`]. It runs as a long-lived background
//! task and exits when the bus is dropped.

use tokio::sync::broadcast;

use crate::bus::{RunEvent, RunOutcome};

pub struct RunJournal;

impl RunJournal {
    /// Run the journal loop until the channel closes.
    ///
    /// Returns the number of events recorded.
    pub async fn run(mut receiver: broadcast::Receiver<RunEvent>) -> u64 {
        let mut recorded = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    Self::record(&event);
                    recorded += 1;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Run journal lagged, some outcomes were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, run journal shutting down");
                    break;
                }
            }
        }
        recorded
    }

    fn record(event: &RunEvent) {
        let outcome = event.outcome.as_str();
        match event.outcome {
            RunOutcome::Completed | RunOutcome::Disabled => {
                tracing::info!(queue = %event.queue, run_id = %event.run_id, outcome, "Run finished");
            }
            RunOutcome::Skipped => {
                tracing::debug!(queue = %event.queue, run_id = %event.run_id, outcome, "Run skipped");
            }
            RunOutcome::Failed => {
                tracing::error!(
                    queue = %event.queue,
                    run_id = %event.run_id,
                    stage = event.stage.as_deref().unwrap_or_default(),
                    error = event.message.as_deref().unwrap_or_default(),
                    "Run failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn records_until_bus_is_dropped() {
        let bus = EventBus::default();
        let handle = tokio::spawn(RunJournal::run(bus.subscribe()));

        bus.publish(RunEvent::new("jobs/$queue", "run-1", RunOutcome::Completed));
        bus.publish(RunEvent::new("jobs/$queue", "run-2", RunOutcome::Failed));
        drop(bus);

        assert_eq!(handle.await.unwrap(), 2);
    }
}
