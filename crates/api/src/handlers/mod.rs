pub mod queues;
pub mod runs;

use runlatch_core::queue::Queue;

use crate::error::AppResult;

/// Resolve a queue from a logical path and an optional force-run path.
pub(crate) fn resolve_queue(path: &str, force_run_path: Option<&str>) -> AppResult<Queue> {
    let queue = match force_run_path {
        Some(force_run_path) => Queue::with_force_run_path(path, force_run_path)?,
        None => Queue::new(path)?,
    };
    Ok(queue)
}
