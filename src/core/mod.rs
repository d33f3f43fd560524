//! The meal analyzer: submits uploads and resolves the background tasks they
//! spawn.

use crate::backend::{HttpBackend, SharedBackend, Submission, Upload};
use crate::config::MealsmithConfig;
use crate::error::{MealsmithError, MealsmithResult};
use crate::task::{TaskId, TaskKind, TaskSnapshot};
use crate::transform::TaskOutcome;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::broadcast;

pub mod batch;
pub mod poller;
pub mod tracker;

pub use batch::query_batch;
pub use poller::{PollPolicy, PollState, PollStats, TaskPoller, Timer, TokioTimer};
pub use tracker::{TaskTracker, TrackedResult};

/// Capacity of the submission event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Broadcast to observers after the backend accepts an upload.
#[derive(Debug, Clone)]
pub enum SubmissionEvent {
    /// New content was accepted
    Accepted {
        /// Correlation identifier sent with the upload
        correlation_id: String,
        /// Persisted record, if any
        record_id: Option<String>,
        /// The uploaded bytes, for local caching
        content: Bytes,
        /// Number of background tasks spawned
        task_count: usize,
    },
}

/// Submits meal photos and tracks the analysis tasks they spawn.
///
/// Construct one per application and share it by reference; it holds no
/// per-submission state.
///
/// # Examples
///
/// ```rust,no_run
/// use mealsmith::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> MealsmithResult<()> {
///     let analyzer = MealAnalyzer::http(MealsmithConfig::from_env()?)?;
///
///     let photo = std::fs::read("lunch.jpg").map_err(|e| MealsmithError::invalid_request(e.to_string()))?;
///     let submission = analyzer.submit(Upload::new(photo, "user-42")).await?;
///     println!("analysis: {}", submission.analysis_result.as_value());
///
///     let mut tracker = analyzer.track(&submission);
///     while let Some(result) = tracker.next().await {
///         println!("{}: {:?}", result.kind, result.outcome);
///     }
///     Ok(())
/// }
/// ```
pub struct MealAnalyzer {
    backend: SharedBackend,
    timer: Arc<dyn Timer>,
    config: MealsmithConfig,
    events: broadcast::Sender<SubmissionEvent>,
}

impl MealAnalyzer {
    /// Create an analyzer over any backend.
    pub fn new(backend: SharedBackend, config: MealsmithConfig) -> MealsmithResult<Self> {
        config
            .validate()
            .map_err(|errors| MealsmithError::config(errors.join("; ")))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tracing::debug!(backend = backend.name(), "Meal analyzer created");
        Ok(Self {
            backend,
            timer: Arc::new(TokioTimer),
            config,
            events,
        })
    }

    /// Create an analyzer talking HTTP to `config.client.base_url`.
    pub fn http(config: MealsmithConfig) -> MealsmithResult<Self> {
        let backend = HttpBackend::new(&config.client)?;
        Self::new(Arc::new(backend), config)
    }

    /// Replace the timer used between polls.
    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    /// Receive a [`SubmissionEvent`] for every accepted upload.
    pub fn subscribe(&self) -> broadcast::Receiver<SubmissionEvent> {
        self.events.subscribe()
    }

    /// Submit one upload.
    ///
    /// Never retries; a failed submission is reported as is.
    pub async fn submit(&self, upload: Upload) -> MealsmithResult<Submission> {
        upload.validate()?;

        let correlation_id = upload.correlation_id.clone();
        let content = upload.content.clone();

        let submission = self.backend.submit(upload).await.inspect_err(|error| {
            tracing::warn!(correlation_id = %correlation_id, error = %error, "Submission failed");
        })?;

        tracing::info!(
            correlation_id = %correlation_id,
            record_id = ?submission.record_id,
            tasks = submission.async_tasks.len(),
            "Submission accepted"
        );

        let event = SubmissionEvent::Accepted {
            correlation_id,
            record_id: submission.record_id.clone(),
            content,
            task_count: submission.async_tasks.len(),
        };
        if self.events.send(event).is_err() {
            tracing::debug!("No submission observers");
        }

        Ok(submission)
    }

    /// Start polling every task `submission` spawned.
    ///
    /// Must be called from within a tokio runtime.
    pub fn track(&self, submission: &Submission) -> TaskTracker {
        let tasks = submission
            .async_tasks
            .iter()
            .map(|(kind, id)| (kind, id.clone()))
            .collect();

        TaskTracker::spawn(
            tasks,
            Arc::clone(&self.backend),
            Arc::clone(&self.timer),
            self.policy(),
            self.config.polling.result_channel_capacity,
        )
    }

    /// Submit an upload and start tracking its tasks.
    pub async fn submit_and_track(&self, upload: Upload) -> MealsmithResult<(Submission, TaskTracker)> {
        let submission = self.submit(upload).await?;
        let tracker = self.track(&submission);
        Ok((submission, tracker))
    }

    /// Poll one task inline and return its typed result.
    pub async fn resolve(&self, kind: TaskKind, task_id: impl Into<TaskId>) -> MealsmithResult<TaskOutcome> {
        tracker::resolve_task(
            Arc::clone(&self.backend),
            Arc::clone(&self.timer),
            self.policy(),
            kind,
            task_id.into(),
        )
        .await
    }

    /// Read the current snapshots of `task_ids` without polling.
    pub async fn refresh(&self, task_ids: &[TaskId]) -> MealsmithResult<Vec<TaskSnapshot>> {
        query_batch(self.backend.as_ref(), task_ids).await
    }

    /// Get the configuration used by this analyzer.
    pub fn config(&self) -> &MealsmithConfig {
        &self.config
    }

    fn policy(&self) -> PollPolicy {
        PollPolicy::from(&self.config.polling)
    }
}

impl std::fmt::Debug for MealAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MealAnalyzer")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, ScriptedResponse};
    use crate::error::ErrorKind;
    use crate::task::{AsyncTasks, TaskPayload, TaskStatus, TipEntry};
    use crate::transform::DataSource;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn trend_done() -> TaskSnapshot {
        TaskSnapshot::new("t1", TaskKind::GlucoseTrend, TaskStatus::Completed).with_result(TaskPayload {
            peak_value: Some(148.0),
            ..Default::default()
        })
    }

    fn order_done() -> TaskSnapshot {
        let tips = (1..=3)
            .map(|order| TipEntry {
                order,
                title: format!("Step {order}"),
                description: String::new(),
                foods: None,
            })
            .collect();
        TaskSnapshot::new("t2", TaskKind::EatingOrder, TaskStatus::Completed).with_result(TaskPayload {
            title: Some("Vegetables first".to_string()),
            tips: Some(tips),
            ..Default::default()
        })
    }

    fn submission() -> Submission {
        Submission::new(serde_json::json!({"calories": 640}))
            .with_tasks(
                AsyncTasks::new()
                    .with(TaskKind::GlucoseTrend, "t1")
                    .with(TaskKind::EatingOrder, "t2"),
            )
            .with_record_id("rec-7")
    }

    fn analyzer(backend: InMemoryBackend) -> (MealAnalyzer, Arc<InMemoryBackend>) {
        let backend = Arc::new(backend);
        let analyzer = MealAnalyzer::new(backend.clone(), MealsmithConfig::default()).unwrap();
        (analyzer, backend)
    }

    #[tokio::test]
    async fn test_submit_notifies_observers() {
        let (analyzer, backend) = analyzer(InMemoryBackend::new().with_submission(submission()));
        let mut events = analyzer.subscribe();

        let result = assert_ok!(analyzer.submit(Upload::new(vec![0xFFu8, 0xD8], "user-1")).await);
        assert!(result.has_async_tasks());
        assert_eq!(result.task_id(TaskKind::GlucoseTrend).map(String::as_str), Some("t1"));

        let SubmissionEvent::Accepted {
            correlation_id,
            record_id,
            content,
            task_count,
        } = events.recv().await.unwrap();
        assert_eq!(correlation_id, "user-1");
        assert_eq!(record_id.as_deref(), Some("rec-7"));
        assert_eq!(&content[..], &[0xFFu8, 0xD8]);
        assert_eq!(task_count, 2);
        assert_eq!(backend.submit_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_submission_is_not_retried() {
        let (analyzer, backend) = analyzer(InMemoryBackend::new().with_failing_submission(
            ScriptedResponse::TransportFailure("no route to host".to_string()),
        ));
        let mut events = analyzer.subscribe();

        let err = assert_err!(analyzer.submit(Upload::new(vec![1u8], "user-1")).await);
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(backend.submit_calls(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_upload_never_reaches_backend() {
        let (analyzer, backend) = analyzer(InMemoryBackend::new().with_submission(submission()));
        let err = assert_err!(analyzer.submit(Upload::new(Vec::<u8>::new(), "user-1")).await);
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(backend.submit_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_arrive_independently() {
        let backend = InMemoryBackend::new()
            .with_submission(submission())
            .with_task(
                "t1",
                [TaskSnapshot::new("t1", TaskKind::GlucoseTrend, TaskStatus::Pending), trend_done()],
            )
            .with_task(
                "t2",
                [
                    TaskSnapshot::new("t2", TaskKind::EatingOrder, TaskStatus::Running),
                    TaskSnapshot::new("t2", TaskKind::EatingOrder, TaskStatus::Running),
                    TaskSnapshot::new("t2", TaskKind::EatingOrder, TaskStatus::Running),
                    order_done(),
                ],
            );
        let (analyzer, _) = analyzer(backend);

        let start = tokio::time::Instant::now();
        let (_, mut tracker) = assert_ok!(analyzer.submit_and_track(Upload::new(vec![1u8], "user-1")).await);
        assert_eq!(tracker.len(), 2);

        let first = tracker.next().await.unwrap();
        let first_at = start.elapsed();
        assert_eq!(first.kind, TaskKind::GlucoseTrend);
        let TaskOutcome::GlucoseTrend(forecast) = assert_ok!(first.outcome) else {
            panic!("expected a glucose forecast");
        };
        assert_eq!(forecast.peak_value, 148.0);

        let second = tracker.next().await.unwrap();
        let second_at = start.elapsed();
        assert_eq!(second.task_id, "t2");
        let TaskOutcome::EatingOrder(advice) = assert_ok!(second.outcome) else {
            panic!("expected eating order advice");
        };
        let orders: Vec<u32> = advice.tips.iter().map(|tip| tip.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(advice.source, DataSource::Reported);

        assert!(first_at < second_at);
        assert!(tracker.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_block_other_task() {
        let backend = InMemoryBackend::new()
            .with_task("t1", [TaskSnapshot::new("t1", TaskKind::GlucoseTrend, TaskStatus::Running)])
            .with_task("t2", [order_done()]);
        let (analyzer, _) = analyzer(backend);

        let results = analyzer.track(&submission()).collect_all().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].task_id, "t2");
        assert!(results[0].outcome.is_ok());
        assert_eq!(
            results[1].outcome.as_ref().unwrap_err().kind(),
            ErrorKind::PollingTimeout
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let backend = InMemoryBackend::new()
            .with_task("t1", [TaskSnapshot::new("t1", TaskKind::GlucoseTrend, TaskStatus::Running)])
            .with_task("t2", [TaskSnapshot::new("t2", TaskKind::EatingOrder, TaskStatus::Pending)]);
        let (analyzer, backend) = analyzer(backend);

        let mut tracker = analyzer.track(&submission());
        tokio::time::sleep(Duration::from_millis(4000)).await;
        tracker.cancel();

        let t1_queries = backend.fetch_count("t1").await;
        assert!(t1_queries > 0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.fetch_count("t1").await, t1_queries);
        assert!(tracker.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_tracker_stops_polling() {
        let backend = InMemoryBackend::new()
            .with_task("t1", [TaskSnapshot::new("t1", TaskKind::GlucoseTrend, TaskStatus::Running)]);
        let (analyzer, backend) = analyzer(backend);

        let tracker = analyzer.track(&Submission::new(serde_json::json!({})).with_tasks(
            AsyncTasks::new().with(TaskKind::GlucoseTrend, "t1"),
        ));
        tokio::time::sleep(Duration::from_millis(2000)).await;
        drop(tracker);

        let queries = backend.fetch_count("t1").await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.fetch_count("t1").await, queries);
    }

    #[tokio::test]
    async fn test_resolve_and_reserved_kind() {
        let (analyzer, backend) = analyzer(InMemoryBackend::new().with_task("t2", [order_done()]));

        let outcome = assert_ok!(analyzer.resolve(TaskKind::EatingOrder, "t2").await);
        assert_eq!(outcome.kind(), TaskKind::EatingOrder);

        let err = assert_err!(analyzer.resolve(TaskKind::NutritionReport, "t3").await);
        assert_eq!(err.kind(), ErrorKind::UnsupportedTaskKind);
        assert_eq!(backend.fetch_count("t3").await, 0);
    }

    #[tokio::test]
    async fn test_tracker_is_a_stream() {
        use futures::StreamExt;

        let (analyzer, _) = analyzer(
            InMemoryBackend::new().with_task("t1", [trend_done()]).with_task("t2", [order_done()]),
        );
        let results: Vec<TrackedResult> = analyzer.track(&submission()).collect().await;
        assert_eq!(results.len(), 2);

        let mut ids: Vec<TaskId> = analyzer
            .track(&submission())
            .filter_map(|result| async move { result.outcome.is_ok().then_some(result.task_id) })
            .collect()
            .await;
        ids.sort();
        assert_eq!(ids, vec!["t1".to_string(), "t2".to_string()]);
    }

    #[tokio::test]
    async fn test_no_background_work() {
        let (analyzer, _) = analyzer(InMemoryBackend::new());
        let mut tracker = analyzer.track(&Submission::new(serde_json::json!({"calories": 200})));
        assert!(tracker.is_empty());
        assert!(tracker.next().await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_reads_once() {
        let (analyzer, backend) = analyzer(
            InMemoryBackend::new().with_task("t1", [trend_done()]).with_task("t2", [order_done()]),
        );

        let snapshots = assert_ok!(analyzer.refresh(&["t1".to_string(), "t2".to_string()]).await);
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots.iter().all(|s| s.status == TaskStatus::Completed));
        assert_eq!(backend.batch_calls(), 1);

        assert!(assert_ok!(analyzer.refresh(&[]).await).is_empty());
        assert_eq!(backend.batch_calls(), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = MealsmithConfig::default();
        config.polling.max_attempts = 0;
        let err = MealAnalyzer::new(Arc::new(InMemoryBackend::new()), config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
