//! One-shot status read for many tasks, used for manual refreshes.

use crate::backend::TaskBackend;
use crate::error::MealsmithResult;
use crate::task::{TaskId, TaskSnapshot};
use std::collections::HashSet;

/// Read the current snapshots of `task_ids` in a single round trip.
///
/// Never polls or waits. An empty id set returns an empty result without
/// touching the backend; duplicate ids are queried once. Ids the backend
/// does not know are simply missing from the result, and no ordering is
/// promised.
pub async fn query_batch(
    backend: &dyn TaskBackend,
    task_ids: &[TaskId],
) -> MealsmithResult<Vec<TaskSnapshot>> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(task_ids.len());
    for id in task_ids {
        if seen.insert(id.as_str()) {
            unique.push(id.clone());
        }
    }

    if unique.is_empty() {
        return Ok(Vec::new());
    }

    let snapshots = backend.fetch_tasks(&unique).await?;
    tracing::debug!(
        backend = backend.name(),
        requested = unique.len(),
        returned = snapshots.len(),
        "Batch status query"
    );
    Ok(snapshots)
}
