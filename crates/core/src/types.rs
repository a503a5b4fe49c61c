/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Caller-supplied identifier of one run attempt.
pub type RunId = String;

/// Generate a fresh, time-ordered run identifier (UUID v7).
///
/// Trigger adapters must hand out unique ids to concurrently dispatched
/// runs. The v7 timestamp prefix keeps `lastRunID` readable when
/// inspecting a state document.
pub fn new_run_id() -> RunId {
    uuid::Uuid::now_v7().to_string()
}
