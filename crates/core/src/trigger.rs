//! Change notifications and how a trigger adapter reacts to them.
//!
//! The store announces every committed write. A trigger adapter turns the
//! relevant ones into `Processor::process` calls, and must tell force-run
//! signals apart from ordinary writes so a run never re-triggers itself.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::paths;
use crate::queue::Queue;

/// Matches fully-qualified document resource names.
static RESOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*/databases/\(default\)/documents/(.+)$").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// One committed write announced by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub path: String,
    pub kind: ChangeKind,
}

impl ChangeNotification {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// What a trigger adapter should do with a notification for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// New work arrived in the queue's collection.
    Run,
    /// A finished run requested a trailing-edge re-run.
    ForceRun,
    Ignore,
}

impl TriggerDecision {
    pub fn should_run(self) -> bool {
        !matches!(self, Self::Ignore)
    }
}

/// Classify a notification against a queue.
///
/// Only creations count as new work; updates to existing items are
/// usually the queue's own worker writing results back and would loop.
/// Deletes never trigger, and the queue's own bookkeeping documents are
/// ignored except for writes to the force-run document.
pub fn classify(queue: &Queue, notification: &ChangeNotification) -> TriggerDecision {
    if notification.kind == ChangeKind::Delete {
        return TriggerDecision::Ignore;
    }

    let path = notification.path.trim_start_matches('/');
    if path == queue.force_run_path() {
        return TriggerDecision::ForceRun;
    }

    if notification.kind != ChangeKind::Create
        || path == queue.state_path()
        || paths::is_reserved(path)
        || paths::parent(path) != Some(queue.collection())
    {
        return TriggerDecision::Ignore;
    }

    TriggerDecision::Run
}

/// Extract a document path from a fully-qualified resource name such as
/// `projects/p/databases/(default)/documents/items/a`.
pub fn path_from_resource(raw: &str) -> Result<String, CoreError> {
    RESOURCE_RE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| CoreError::InvalidPath(format!("Invalid resource name: '{raw}'")))
}
