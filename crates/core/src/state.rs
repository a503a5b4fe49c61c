//! Persisted documents owned by a queue.

use serde::{Deserialize, Serialize};

use crate::store::Fields;
use crate::types::Timestamp;

/// Field names as stored in the state document.
pub mod fields {
    pub const IS_RUNNING: &str = "isRunning";
    pub const LAST_RUN_ID: &str = "lastRunID";
    pub const LAST_RUN_AT: &str = "lastRunAt";
    pub const DISABLED: &str = "disabled";
    pub const FORCE_RUN_REF: &str = "forceRunRef";

    pub const QUEUE_STATE_REF: &str = "queueStateRef";
    pub const REQUESTED_AT: &str = "requestedAt";
}

/// The lock/lease document of one queue.
///
/// `is_running` is the mutual-exclusion flag. Only the store's atomic
/// transactions guard it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    #[serde(default)]
    pub is_running: bool,

    #[serde(rename = "lastRunID", default)]
    pub last_run_id: String,

    #[serde(default)]
    pub last_run_at: Option<Timestamp>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub force_run_ref: Option<String>,
}

impl StateDocument {
    /// Fields written when a run acquires a fresh (absent) state document.
    pub(crate) fn acquired_fields(run_id: &str, force_run_path: &str) -> Fields {
        Fields::new()
            .with(fields::IS_RUNNING, true)
            .with(fields::LAST_RUN_ID, run_id)
            .with_server_timestamp(fields::LAST_RUN_AT)
            .with(fields::DISABLED, false)
            .with(fields::FORCE_RUN_REF, force_run_path)
    }

    /// Fields updated when a run acquires an existing, idle state document.
    pub(crate) fn reacquired_fields(run_id: &str) -> Fields {
        Fields::new()
            .with(fields::IS_RUNNING, true)
            .with_server_timestamp(fields::LAST_RUN_AT)
            .with(fields::LAST_RUN_ID, run_id)
    }

    pub(crate) fn released_fields() -> Fields {
        Fields::new().with(fields::IS_RUNNING, false)
    }
}

/// The secondary document whose write requests a trailing-edge re-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceRunSignal {
    pub queue_state_ref: String,
    #[serde(default)]
    pub requested_at: Option<Timestamp>,
}

impl ForceRunSignal {
    pub(crate) fn fields(state_path: &str) -> Fields {
        Fields::new()
            .with(fields::QUEUE_STATE_REF, state_path)
            .with_server_timestamp(fields::REQUESTED_AT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldValue;

    #[test]
    fn decodes_wire_names() {
        let json = serde_json::json!({
            "isRunning": true,
            "lastRunID": "run-1",
            "lastRunAt": "2026-01-02T03:04:05Z",
            "forceRunRef": "jobs/$queue/force/$run",
        });
        let state: StateDocument = serde_json::from_value(json).unwrap();
        assert!(state.is_running);
        assert_eq!(state.last_run_id, "run-1");
        assert!(state.last_run_at.is_some());
        assert!(!state.disabled);
        assert_eq!(state.force_run_ref.as_deref(), Some("jobs/$queue/force/$run"));
    }

    #[test]
    fn missing_fields_default() {
        let state: StateDocument = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(state, StateDocument::default());
    }

    #[test]
    fn encodes_wire_names() {
        let json = serde_json::to_value(StateDocument {
            last_run_id: "r".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["lastRunID"], "r");
        assert_eq!(json["isRunning"], false);
        assert!(json.get("last_run_id").is_none());
    }

    #[test]
    fn acquired_fields_carry_force_run_ref() {
        let written = StateDocument::acquired_fields("r1", "a/$queue/force/$run");
        assert_eq!(
            written.get(fields::FORCE_RUN_REF),
            Some(&FieldValue::Value("a/$queue/force/$run".into()))
        );
        assert_eq!(
            written.get(fields::LAST_RUN_AT),
            Some(&FieldValue::ServerTimestamp)
        );
    }
}
