//! Live tracking of the background tasks spawned by one submission.
//!
//! Every task gets its own poller running as an independent tokio task.
//! Results arrive on a channel in the order the pollers resolve, so a fast
//! task never waits for a slow one.

use crate::backend::SharedBackend;
use crate::core::poller::{PollPolicy, TaskPoller, Timer};
use crate::error::{MealsmithError, MealsmithResult};
use crate::task::{TaskId, TaskKind};
use crate::transform::{TaskOutcome, transform_snapshot};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The resolution of one tracked task
#[derive(Debug)]
pub struct TrackedResult {
    /// Kind the task was spawned as
    pub kind: TaskKind,
    /// The task
    pub task_id: TaskId,
    /// Typed result, or why there is none
    pub outcome: MealsmithResult<TaskOutcome>,
}

/// Poll `task_id` to completion and transform its payload.
pub(crate) async fn resolve_task(
    backend: SharedBackend,
    timer: Arc<dyn Timer>,
    policy: PollPolicy,
    kind: TaskKind,
    task_id: TaskId,
) -> MealsmithResult<TaskOutcome> {
    if !kind.is_supported() {
        return Err(MealsmithError::UnsupportedTaskKind {
            kind: kind.key().to_string(),
        });
    }

    let mut poller = TaskPoller::with_timer(task_id, backend, timer, policy);
    let snapshot = poller.run().await?;
    transform_snapshot(&snapshot, kind)
}

/// Handle over the pollers of one submission.
///
/// Dropping the tracker, or calling [`TaskTracker::cancel`], stops every
/// poller that has not resolved yet. The backend tasks themselves keep
/// running; only local observation ends.
#[derive(Debug)]
pub struct TaskTracker {
    results: mpsc::Receiver<TrackedResult>,
    handles: Vec<JoinHandle<()>>,
    tracked: usize,
}

impl TaskTracker {
    /// Spawn one poller per `(kind, task id)` pair.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(
        tasks: Vec<(TaskKind, TaskId)>,
        backend: SharedBackend,
        timer: Arc<dyn Timer>,
        policy: PollPolicy,
        channel_capacity: usize,
    ) -> Self {
        let (results_tx, results) = mpsc::channel(channel_capacity.max(1));
        let tracked = tasks.len();

        let handles = tasks
            .into_iter()
            .map(|(kind, task_id)| {
                let backend = Arc::clone(&backend);
                let timer = Arc::clone(&timer);
                let results_tx = results_tx.clone();

                tokio::spawn(async move {
                    tracing::debug!(task_id = %task_id, kind = %kind, "Tracking task");
                    let outcome =
                        resolve_task(backend, timer, policy, kind, task_id.clone()).await;

                    let result = TrackedResult {
                        kind,
                        task_id,
                        outcome,
                    };
                    if let Err(unsent) = results_tx.send(result).await {
                        tracing::debug!(
                            task_id = %unsent.0.task_id,
                            "Tracker dropped before the result was delivered"
                        );
                    }
                })
            })
            .collect();

        Self {
            results,
            handles,
            tracked,
        }
    }

    /// Number of tasks being tracked
    pub fn len(&self) -> usize {
        self.tracked
    }

    /// True when the submission spawned no background work
    pub fn is_empty(&self) -> bool {
        self.tracked == 0
    }

    /// Wait for the next task to resolve.
    ///
    /// Returns `None` once every task has been delivered. After
    /// [`TaskTracker::cancel`] only results that were already queued are
    /// returned.
    pub async fn next(&mut self) -> Option<TrackedResult> {
        self.results.recv().await
    }

    /// Wait for every remaining task, in resolution order.
    pub async fn collect_all(mut self) -> Vec<TrackedResult> {
        let mut results = Vec::with_capacity(self.tracked);
        while let Some(result) = self.next().await {
            results.push(result);
        }
        results
    }

    /// Stop all pollers that have not resolved yet.
    pub fn cancel(&mut self) {
        let running = self.handles.iter().filter(|h| !h.is_finished()).count();
        if running > 0 {
            tracing::info!(running, "Cancelling task pollers");
        }
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        self.results.close();
    }
}

impl Stream for TaskTracker {
    type Item = TrackedResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().results.poll_recv(cx)
    }
}

impl Drop for TaskTracker {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
