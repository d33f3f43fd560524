//! Single-task poller.
//!
//! A [`TaskPoller`] resolves one task id to a completed snapshot by querying
//! its status at a fixed interval. It is an explicit state machine:
//!
//! ```text
//!            pending/running              interval elapsed
//! Querying ───────────────────▶ Waiting ──────────────────▶ Querying
//!    │  transient failure                 interval elapsed
//!    ├────────────────────────▶ Retrying ─────────────────▶ Querying
//!    │  completed / failed / cancelled / other error / budget spent
//!    └────────────────────────▶ Done
//! ```
//!
//! Pending observations and transient failures draw from the same attempt
//! budget. Sleeping goes through a [`Timer`] so tests can run on virtual time.

use crate::backend::SharedBackend;
use crate::config::PollingConfig;
use crate::error::{MealsmithError, MealsmithResult, TASK_FAILED_FALLBACK_MESSAGE};
use crate::task::{TaskId, TaskSnapshot, TaskStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Suspends a poller between two queries
#[async_trait]
pub trait Timer: Send + Sync {
    /// Sleep for `duration`
    async fn sleep(&self, duration: Duration);
}

/// [`Timer`] backed by `tokio::time`, which honors a paused test clock
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Interval and attempt budget of a poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait between two queries
    pub interval: Duration,
    /// Maximum number of queries
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for PollPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            max_attempts: config.max_attempts,
        }
    }
}

/// Where a poller is in its lifecycle
#[derive(Debug)]
pub enum PollState {
    /// Next step issues a status query
    Querying,
    /// Task is still live; next step sleeps
    Waiting,
    /// Last query failed transiently; next step sleeps
    Retrying(MealsmithError),
    /// A result has been produced
    Done,
}

/// Counters of one poller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Status queries issued
    pub queries: u32,
    /// Waits taken between queries
    pub sleeps: u32,
}

/// Resolves one task id to a completed snapshot
pub struct TaskPoller {
    task_id: TaskId,
    backend: SharedBackend,
    timer: Arc<dyn Timer>,
    policy: PollPolicy,
    state: PollState,
    stats: PollStats,
    last_seen: Option<TaskSnapshot>,
    last_error: Option<MealsmithError>,
}

impl TaskPoller {
    /// Create a poller for `task_id` using tokio's clock.
    pub fn new(task_id: impl Into<TaskId>, backend: SharedBackend, policy: PollPolicy) -> Self {
        Self::with_timer(task_id, backend, Arc::new(TokioTimer), policy)
    }

    /// Create a poller with a custom timer.
    pub fn with_timer(
        task_id: impl Into<TaskId>,
        backend: SharedBackend,
        timer: Arc<dyn Timer>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            backend,
            timer,
            policy,
            state: PollState::Querying,
            stats: PollStats::default(),
            last_seen: None,
            last_error: None,
        }
    }

    /// The task being polled
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Current state
    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Counters so far
    pub fn stats(&self) -> PollStats {
        self.stats
    }

    /// Drive the state machine until it produces a result.
    pub async fn run(&mut self) -> MealsmithResult<TaskSnapshot> {
        loop {
            if let Some(result) = self.step().await {
                return result;
            }
        }
    }

    /// Advance by one transition.
    ///
    /// Returns `Some` once the poller is done; stepping a finished poller
    /// yields an error.
    pub async fn step(&mut self) -> Option<MealsmithResult<TaskSnapshot>> {
        match std::mem::replace(&mut self.state, PollState::Done) {
            PollState::Querying => self.query().await,
            PollState::Waiting => {
                self.wait().await;
                None
            }
            PollState::Retrying(error) => {
                self.last_error = Some(error);
                self.wait().await;
                None
            }
            PollState::Done => Some(Err(MealsmithError::invalid_request(format!(
                "poller for task {} already finished",
                self.task_id
            )))),
        }
    }

    async fn wait(&mut self) {
        self.stats.sleeps += 1;
        self.timer.sleep(self.policy.interval).await;
        self.state = PollState::Querying;
    }

    async fn query(&mut self) -> Option<MealsmithResult<TaskSnapshot>> {
        self.stats.queries += 1;
        let attempt = self.stats.queries;
        let budget_left = attempt < self.policy.max_attempts;

        let snapshot = match self.backend.fetch_task(&self.task_id).await {
            Ok(snapshot) => snapshot,
            Err(error) if error.is_retryable() => {
                tracing::warn!(
                    task_id = %self.task_id,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    error = %error,
                    "Status query failed, will retry"
                );
                if budget_left {
                    self.state = PollState::Retrying(error);
                    return None;
                }
                self.last_error = Some(error);
                return Some(Err(self.timeout()));
            }
            Err(error) => {
                tracing::error!(task_id = %self.task_id, attempt, error = %error, "Status query rejected");
                return Some(Err(error));
            }
        };

        if let Some(previous) = &self.last_seen {
            if let Err(problem) = previous.observe(&snapshot) {
                tracing::warn!(task_id = %self.task_id, "Inconsistent status observation: {}", problem);
            }
        }

        tracing::debug!(task_id = %self.task_id, attempt, status = %snapshot.status, "Polled task status");

        match snapshot.status {
            TaskStatus::Pending | TaskStatus::Running => {
                self.last_seen = Some(snapshot);
                if budget_left {
                    self.state = PollState::Waiting;
                    None
                } else {
                    Some(Err(self.timeout()))
                }
            }
            TaskStatus::Completed => {
                tracing::info!(task_id = %self.task_id, attempts = attempt, "Task completed");
                Some(Ok(snapshot))
            }
            TaskStatus::Failed => {
                let message = snapshot
                    .error_message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| TASK_FAILED_FALLBACK_MESSAGE.to_string());
                tracing::warn!(task_id = %self.task_id, message = %message, "Task failed");
                Some(Err(MealsmithError::TaskFailed {
                    task_id: self.task_id.clone(),
                    message,
                }))
            }
            TaskStatus::Cancelled => {
                tracing::warn!(task_id = %self.task_id, "Task was cancelled");
                Some(Err(MealsmithError::TaskCancelled {
                    task_id: self.task_id.clone(),
                }))
            }
        }
    }

    fn timeout(&mut self) -> MealsmithError {
        tracing::error!(
            task_id = %self.task_id,
            attempts = self.stats.queries,
            "Task did not finish within the attempt budget"
        );
        MealsmithError::PollingTimeout {
            task_id: self.task_id.clone(),
            attempts: self.stats.queries,
            last_error: self.last_error.take().map(Box::new),
        }
    }
}

impl std::fmt::Debug for TaskPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPoller")
            .field("task_id", &self.task_id)
            .field("backend", &self.backend.name())
            .field("policy", &self.policy)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}
