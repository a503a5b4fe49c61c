//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! Every trigger surface publishes one [`RunEvent`] per attempted run.
//! Share the bus via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use runlatch_core::error::ProcessError;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------------

/// How an attempted run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// Another run held the lock; nothing was done.
    Skipped,
    /// The queue is disabled by an operator.
    Disabled,
    Failed,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Disabled => "disabled",
            Self::Failed => "failed",
        }
    }
}

/// The outcome of one `process` call on one queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// State document path of the queue.
    pub queue: String,

    pub run_id: String,

    pub outcome: RunOutcome,

    /// Failed stage, for `Failed` outcomes.
    pub stage: Option<String>,

    /// Error message, for `Failed` outcomes.
    pub message: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn new(queue: impl Into<String>, run_id: impl Into<String>, outcome: RunOutcome) -> Self {
        Self {
            queue: queue.into(),
            run_id: run_id.into(),
            outcome,
            stage: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    /// Classify the result of `Processor::process`.
    ///
    /// Contention and operator disablement are expected outcomes, not
    /// failures.
    pub fn from_result(
        queue: impl Into<String>,
        run_id: impl Into<String>,
        result: &Result<(), ProcessError>,
    ) -> Self {
        match result {
            Ok(()) => Self::new(queue, run_id, RunOutcome::Completed),
            Err(err) if err.is_already_running() => Self::new(queue, run_id, RunOutcome::Skipped),
            Err(err) if err.is_disabled() => Self::new(queue, run_id, RunOutcome::Disabled),
            Err(err) => Self {
                stage: Some(err.stage.to_string()),
                message: Some(err.to_string()),
                ..Self::new(queue, run_id, RunOutcome::Failed)
            },
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out of [`RunEvent`]s.
///
/// ```rust
/// use runlatch_events::bus::{EventBus, RunEvent, RunOutcome};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(RunEvent::new("jobs/$queue", "run-1", RunOutcome::Completed));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if there are none.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
