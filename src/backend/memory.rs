//! In-memory backend for Mealsmith.
//!
//! This backend answers from scripts prepared up front instead of talking to a
//! server. It's what the test suite and the demo run against.
//!
//! Each task id owns a queue of [`ScriptedResponse`]s. Every status query pops
//! the next one; the last response is sticky and repeats forever, so a script
//! of `[Pending, Completed]` reports pending once and completed from then on.

use super::{Submission, TaskBackend, Upload};
use crate::error::{MealsmithError, MealsmithResult};
use crate::task::{TaskId, TaskSnapshot};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// One scripted answer to a status query
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// A well-formed snapshot
    Snapshot(TaskSnapshot),
    /// The request never completed
    TransportFailure(String),
    /// The response could not be parsed
    InvalidResponse(String),
    /// The server answered with a non-success HTTP status
    HttpStatus(u16),
    /// The envelope carried a non-success code
    ApplicationError {
        /// Envelope code
        code: i64,
        /// Envelope message
        message: String,
    },
}

impl ScriptedResponse {
    fn into_result(self) -> MealsmithResult<TaskSnapshot> {
        match self {
            Self::Snapshot(snapshot) => Ok(snapshot),
            Self::TransportFailure(message) => Err(MealsmithError::TransportFailure {
                message,
                source: None,
            }),
            Self::InvalidResponse(message) => Err(MealsmithError::invalid_response(message)),
            Self::HttpStatus(status) => Err(MealsmithError::http_status(
                status,
                format!("HTTP {status}"),
            )),
            Self::ApplicationError { code, message } => {
                Err(MealsmithError::ApplicationError { code, message })
            }
        }
    }
}

impl From<TaskSnapshot> for ScriptedResponse {
    fn from(snapshot: TaskSnapshot) -> Self {
        Self::Snapshot(snapshot)
    }
}

#[derive(Debug, Default)]
struct TaskScript {
    responses: VecDeque<ScriptedResponse>,
    latency: Option<Duration>,
    fetches: u32,
}

impl TaskScript {
    fn next(&mut self) -> Option<ScriptedResponse> {
        self.fetches += 1;
        if self.responses.len() > 1 {
            self.responses.pop_front()
        } else {
            self.responses.front().cloned()
        }
    }
}

/// Scripted in-memory backend implementation
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    /// Scripts indexed by task id
    scripts: Mutex<HashMap<TaskId, TaskScript>>,
    /// Answer to every submission
    submission: Option<Result<Submission, ScriptedResponse>>,
    /// Uploads received, in order
    uploads: Mutex<Vec<Upload>>,
    submit_calls: AtomicU32,
    batch_calls: AtomicU32,
}

impl InMemoryBackend {
    /// Create a backend with no scripts
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every submission with `submission`.
    pub fn with_submission(mut self, submission: Submission) -> Self {
        self.submission = Some(Ok(submission));
        self
    }

    /// Fail every submission with `response`.
    pub fn with_failing_submission(mut self, response: ScriptedResponse) -> Self {
        self.submission = Some(Err(response));
        self
    }

    /// Script the answers for `task_id`.
    pub fn with_task<I, R>(mut self, task_id: impl Into<TaskId>, responses: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ScriptedResponse>,
    {
        let script = self.scripts.get_mut().entry(task_id.into()).or_default();
        script.responses = responses.into_iter().map(Into::into).collect();
        self
    }

    /// Delay every status query of `task_id` by `latency`.
    pub fn with_latency(mut self, task_id: impl Into<TaskId>, latency: Duration) -> Self {
        self.scripts.get_mut().entry(task_id.into()).or_default().latency = Some(latency);
        self
    }

    /// Number of single-task status queries received for `task_id`
    pub async fn fetch_count(&self, task_id: &str) -> u32 {
        let scripts = self.scripts.lock().await;
        scripts.get(task_id).map_or(0, |script| script.fetches)
    }

    /// Number of batch queries received
    pub fn batch_calls(&self) -> u32 {
        self.batch_calls.load(Ordering::Relaxed)
    }

    /// Number of submissions received
    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::Relaxed)
    }

    /// Uploads received so far
    pub async fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().await.clone()
    }
}

#[async_trait]
impl TaskBackend for InMemoryBackend {
    async fn submit(&self, upload: Upload) -> MealsmithResult<Submission> {
        self.submit_calls.fetch_add(1, Ordering::Relaxed);
        upload.validate()?;
        self.uploads.lock().await.push(upload);

        match &self.submission {
            Some(Ok(submission)) => Ok(submission.clone()),
            Some(Err(response)) => match response.clone().into_result() {
                Err(error) => Err(error),
                Ok(_) => Err(MealsmithError::invalid_response(
                    "submission answered with a task snapshot",
                )),
            },
            None => Err(MealsmithError::invalid_response("no submission scripted")),
        }
    }

    async fn fetch_task(&self, task_id: &TaskId) -> MealsmithResult<TaskSnapshot> {
        let (response, latency) = {
            let mut scripts = self.scripts.lock().await;
            match scripts.get_mut(task_id) {
                Some(script) => (script.next(), script.latency),
                None => (None, None),
            }
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        tracing::debug!(task_id = %task_id, response = ?response, "In-memory status query");

        response
            .ok_or_else(|| MealsmithError::ApplicationError {
                code: 404,
                message: format!("Task {task_id} not found"),
            })?
            .into_result()
    }

    async fn fetch_tasks(&self, task_ids: &[TaskId]) -> MealsmithResult<Vec<TaskSnapshot>> {
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        let scripts = self.scripts.lock().await;

        // Batch reads peek at the current answer without advancing scripts.
        let snapshots = task_ids
            .iter()
            .filter_map(|id| scripts.get(id))
            .filter_map(|script| match script.responses.front() {
                Some(ScriptedResponse::Snapshot(snapshot)) => Some(snapshot.clone()),
                _ => None,
            })
            .collect();

        Ok(snapshots)
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::task::{TaskKind, TaskStatus};

    fn snapshot(id: &str, status: TaskStatus) -> TaskSnapshot {
        TaskSnapshot::new(id, TaskKind::GlucoseTrend, status)
    }

    #[tokio::test]
    async fn test_last_response_is_sticky() {
        let backend = InMemoryBackend::new().with_task(
            "t1",
            [
                snapshot("t1", TaskStatus::Pending),
                snapshot("t1", TaskStatus::Completed),
            ],
        );
        let id = "t1".to_string();

        assert_eq!(backend.fetch_task(&id).await.unwrap().status, TaskStatus::Pending);
        assert_eq!(backend.fetch_task(&id).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(backend.fetch_task(&id).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(backend.fetch_count("t1").await, 3);
    }

    #[tokio::test]
    async fn test_scripted_errors() {
        let backend = InMemoryBackend::new().with_task(
            "t1",
            [
                ScriptedResponse::TransportFailure("offline".to_string()),
                snapshot("t1", TaskStatus::Running).into(),
            ],
        );
        let id = "t1".to_string();

        let err = backend.fetch_task(&id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert!(backend.fetch_task(&id).await.is_ok());

        let err = backend.fetch_task(&"missing".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApplicationError);
    }

    #[tokio::test]
    async fn test_submission_records_uploads() {
        let backend = InMemoryBackend::new()
            .with_submission(Submission::new(serde_json::json!({"calories": 500})));

        backend.submit(Upload::new(vec![1u8, 2], "user-1")).await.unwrap();
        assert_eq!(backend.submit_calls(), 1);
        assert_eq!(backend.uploads().await[0].correlation_id, "user-1");

        let failing = InMemoryBackend::new().with_failing_submission(
            ScriptedResponse::ApplicationError {
                code: 500,
                message: "Analysis service unavailable".to_string(),
            },
        );
        let err = failing.submit(Upload::new(vec![1u8], "user-1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApplicationError);
    }
}
