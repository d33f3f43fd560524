//! Backends that accept submissions and report task status.
//!
//! Mealsmith talks to its analysis service through the [`TaskBackend`] trait:
//! - **HTTP**: the real JSON/multipart API, see [`HttpBackend`]
//! - **In-Memory**: a scripted stand-in for tests and demos, see [`InMemoryBackend`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use mealsmith::prelude::*;
//!
//! # async fn example() -> MealsmithResult<()> {
//! let backend = HttpBackend::new(&ClientConfig::with_base_url("https://api.example.com"))?;
//! let snapshot = backend.fetch_task(&"t1".to_string()).await?;
//! println!("{} is {}", snapshot.task_id, snapshot.status);
//! # Ok(())
//! # }
//! ```

use crate::error::{MealsmithError, MealsmithResult};
use crate::task::{AsyncTasks, TaskId, TaskKind, TaskSnapshot};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

pub mod http;
pub mod memory;

pub use http::HttpBackend;
pub use memory::{InMemoryBackend, ScriptedResponse};

/// Envelope code that marks a successful response
pub const SUCCESS_CODE: i64 = 200;

/// One unit of work to submit: an image plus the identifier it belongs to.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Raw image bytes
    pub content: Bytes,
    /// Correlates the submission with its owner on the backend
    pub correlation_id: String,
    /// File name reported in the multipart part
    pub file_name: String,
    /// MIME type of `content`
    pub mime_type: String,
}

impl Upload {
    /// Create an upload of a JPEG image.
    pub fn new(content: impl Into<Bytes>, correlation_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            correlation_id: correlation_id.into(),
            file_name: "meal.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
        }
    }

    /// Create an upload correlated by a freshly generated identifier.
    pub fn anonymous(content: impl Into<Bytes>) -> Self {
        Self::new(content, uuid::Uuid::new_v4().to_string())
    }

    /// Set the file name.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Set the MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Reject uploads that cannot form a valid request.
    pub fn validate(&self) -> MealsmithResult<()> {
        if self.content.is_empty() {
            return Err(MealsmithError::invalid_request("upload content is empty"));
        }
        if self.correlation_id.trim().is_empty() {
            return Err(MealsmithError::invalid_request("correlation id is empty"));
        }
        Ok(())
    }
}

/// The synchronous part of a submission's answer.
///
/// Its shape belongs to the nutrition calculators downstream; this crate only
/// guarantees it is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisResult(pub serde_json::Value);

impl AnalysisResult {
    /// Borrow the raw value
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Deserialize into a caller-defined type.
    pub fn parse<T: DeserializeOwned>(&self) -> MealsmithResult<T> {
        Ok(serde_json::from_value(self.0.clone())?)
    }
}

/// Everything a successful submission returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Immediate analysis, independent of any background task
    pub analysis_result: AnalysisResult,
    /// Background tasks spawned by this submission
    #[serde(default)]
    pub async_tasks: AsyncTasks,
    /// Identifier of the persisted record, if the backend made one
    #[serde(default, deserialize_with = "lenient_id")]
    pub record_id: Option<String>,
}

impl Submission {
    /// Create a submission with no background work.
    pub fn new(analysis_result: serde_json::Value) -> Self {
        Self {
            analysis_result: AnalysisResult(analysis_result),
            async_tasks: AsyncTasks::new(),
            record_id: None,
        }
    }

    /// Attach spawned tasks.
    pub fn with_tasks(mut self, async_tasks: AsyncTasks) -> Self {
        self.async_tasks = async_tasks;
        self
    }

    /// Attach a record id.
    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Whether there is background work to track
    pub fn has_async_tasks(&self) -> bool {
        !self.async_tasks.is_empty()
    }

    /// Task id spawned for `kind`, if any
    pub fn task_id(&self, kind: TaskKind) -> Option<&TaskId> {
        self.async_tasks.get(kind)
    }

    /// Reject an answer whose mandatory analysis is missing.
    pub fn validate(&self) -> MealsmithResult<()> {
        if self.analysis_result.0.is_null() {
            return Err(MealsmithError::invalid_response(
                "submission response has no analysis result",
            ));
        }
        Ok(())
    }
}

/// Record ids arrive as strings or numbers depending on the backend version.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(id)) if !id.is_empty() => Some(id),
        Some(serde_json::Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

/// Response wrapper shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Application status; [`SUCCESS_CODE`] on success
    pub code: i64,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
    /// Payload
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Wrap a successful payload.
    pub fn success(data: T) -> Self {
        Self {
            code: SUCCESS_CODE,
            message: Some("success".to_string()),
            data: Some(data),
        }
    }

    /// Unwrap the payload, turning a non-success code into an application
    /// error.
    pub fn into_data(self) -> MealsmithResult<Option<T>> {
        if self.code != SUCCESS_CODE {
            return Err(MealsmithError::ApplicationError {
                code: self.code,
                message: self
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| format!("request failed with code {}", self.code)),
            });
        }
        Ok(self.data)
    }

    /// Like [`ApiEnvelope::into_data`] but a missing payload is an invalid
    /// response.
    pub fn into_required_data(self) -> MealsmithResult<T> {
        self.into_data()?
            .ok_or_else(|| MealsmithError::invalid_response("response envelope has no data"))
    }
}

/// Trait that all backends must implement
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Submit one unit of work
    async fn submit(&self, upload: Upload) -> MealsmithResult<Submission>;

    /// Read one task's current snapshot
    async fn fetch_task(&self, task_id: &TaskId) -> MealsmithResult<TaskSnapshot>;

    /// Read the snapshots of many tasks in one round trip.
    ///
    /// Ids the backend does not know are absent from the result.
    async fn fetch_tasks(&self, task_ids: &[TaskId]) -> MealsmithResult<Vec<TaskSnapshot>>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Convenient type alias for a shared backend
pub type SharedBackend = Arc<dyn TaskBackend>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_submission_parsing() {
        let envelope: ApiEnvelope<Submission> = serde_json::from_value(json!({
            "code": 200,
            "message": "ok",
            "data": {
                "analysisResult": {"calories": 620, "foods": ["rice", "fish"]},
                "asyncTasks": {"glucoseTrend": "t1", "eatingOrder": "t2"},
                "recordId": 42
            }
        }))
        .unwrap();

        let submission = envelope.into_required_data().unwrap();
        assert!(submission.validate().is_ok());
        assert!(submission.has_async_tasks());
        assert_eq!(submission.task_id(TaskKind::EatingOrder).map(String::as_str), Some("t2"));
        assert_eq!(submission.record_id.as_deref(), Some("42"));
        assert_eq!(submission.analysis_result.as_value()["calories"], json!(620));
    }

    #[test]
    fn test_submission_without_tasks() {
        let submission: Submission =
            serde_json::from_value(json!({"analysisResult": {"calories": 300}})).unwrap();
        assert!(!submission.has_async_tasks());
        assert!(submission.record_id.is_none());

        let missing: Submission =
            serde_json::from_value(json!({"analysisResult": null, "asyncTasks": {}})).unwrap();
        assert_eq!(missing.validate().unwrap_err().kind(), ErrorKind::InvalidResponse);
    }

    #[test]
    fn test_envelope_application_error() {
        let envelope: ApiEnvelope<Submission> =
            serde_json::from_value(json!({"code": 413, "message": "Image too large"})).unwrap();
        match envelope.into_data() {
            Err(MealsmithError::ApplicationError { code, message }) => {
                assert_eq!(code, 413);
                assert_eq!(message, "Image too large");
            }
            other => panic!("expected application error, got {other:?}"),
        }
    }

    #[test]
    fn test_envelope_missing_data() {
        let envelope: ApiEnvelope<TaskSnapshot> =
            serde_json::from_value(json!({"code": 200, "message": "ok", "data": null})).unwrap();
        assert_eq!(
            envelope.into_required_data().unwrap_err().kind(),
            ErrorKind::InvalidResponse
        );
    }

    #[test]
    fn test_upload_validation() {
        assert!(Upload::new(vec![1u8, 2, 3], "user-1").validate().is_ok());
        assert!(Upload::new(Vec::<u8>::new(), "user-1").validate().is_err());
        assert!(Upload::new(vec![1u8], " ").validate().is_err());

        let upload = Upload::anonymous(vec![1u8]).with_mime_type("image/png");
        assert!(!upload.correlation_id.is_empty());
        assert_eq!(upload.mime_type, "image/png");
    }
}
