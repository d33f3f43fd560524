//! HTTP backend talking to the analysis service's JSON API.
//!
//! Endpoints:
//! - `POST {upload_path}`: multipart image + correlation field
//! - `GET {task_path}/{taskId}`: one task snapshot
//! - `GET {task_path}/batch?taskIds=a,b,c`: many task snapshots

use super::{ApiEnvelope, Submission, TaskBackend, Upload};
use crate::config::{ClientConfig, DurationExt};
use crate::error::{MealsmithError, MealsmithResult};
use crate::task::{TaskId, TaskSnapshot};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

/// Longest slice of an error body kept in error messages
const MAX_ERROR_BODY: usize = 512;

/// Characters that would break the comma-separated `taskIds` query
const BATCH_RESERVED: [char; 6] = [',', '&', '=', '#', '+', '%'];

/// Backend implementation over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpBackend {
    /// Create a backend with its own connection pool.
    pub fn new(config: &ClientConfig) -> MealsmithResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout_secs.secs())
            .connect_timeout(config.connect_timeout_secs.secs())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| MealsmithError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(client, config))
    }

    /// Create a backend sharing an existing client.
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            config: config.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> MealsmithResult<Url> {
        Url::parse(&format!("{}{}", self.config.base_url, path))
            .map_err(|e| MealsmithError::config(format!("invalid endpoint URL: {e}")))
    }

    /// `{task_path}/{segment}`, with `segment` percent-encoded
    fn task_endpoint(&self, segment: &str) -> MealsmithResult<Url> {
        let mut url = self.endpoint(&self.config.task_path)?;
        url.path_segments_mut()
            .map_err(|_| MealsmithError::config("base URL cannot carry a path"))?
            .pop_if_empty()
            .push(segment);
        Ok(url)
    }

    fn upload_url(&self) -> MealsmithResult<Url> {
        self.endpoint(&self.config.upload_path)
    }

    fn task_url(&self, task_id: &str) -> MealsmithResult<Url> {
        if task_id.trim().is_empty() {
            return Err(MealsmithError::invalid_request("task id is empty"));
        }
        self.task_endpoint(task_id)
    }

    fn batch_url(&self, task_ids: &[TaskId]) -> MealsmithResult<Url> {
        if task_ids.is_empty() {
            return Err(MealsmithError::invalid_request("batch query needs at least one id"));
        }
        for task_id in task_ids {
            validate_batch_id(task_id)?;
        }

        let mut url = self.task_endpoint("batch")?;
        url.set_query(Some(&format!("taskIds={}", task_ids.join(","))));
        Ok(url)
    }

    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> MealsmithResult<ApiEnvelope<T>> {
        let status = response.status();
        let body = response.text().await?;
        decode_envelope(status, &body)
    }
}

/// Decode a response body into an envelope, classifying HTTP and parse
/// failures as invalid responses.
pub(crate) fn decode_envelope<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> MealsmithResult<ApiEnvelope<T>> {
    if !status.is_success() {
        let mut excerpt = body.trim().to_string();
        if excerpt.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !excerpt.is_char_boundary(cut) {
                cut -= 1;
            }
            excerpt.truncate(cut);
        }
        return Err(MealsmithError::http_status(
            status.as_u16(),
            format!("HTTP {status}: {excerpt}"),
        ));
    }

    serde_json::from_str(body).map_err(|e| MealsmithError::InvalidResponse {
        message: format!("unexpected response body: {e}"),
        status: None,
        source: Some(Box::new(e)),
    })
}

fn validate_batch_id(task_id: &str) -> MealsmithResult<()> {
    if task_id.trim().is_empty() {
        return Err(MealsmithError::invalid_request("task id is empty"));
    }
    if task_id.contains(BATCH_RESERVED) {
        return Err(MealsmithError::invalid_request(format!(
            "task id '{task_id}' cannot be sent in a batch query"
        )));
    }
    Ok(())
}

#[async_trait]
impl TaskBackend for HttpBackend {
    async fn submit(&self, upload: Upload) -> MealsmithResult<Submission> {
        upload.validate()?;

        let url = self.upload_url()?;
        let size = upload.content.len();
        let part = Part::bytes(upload.content.to_vec())
            .file_name(upload.file_name)
            .mime_str(&upload.mime_type)?;
        let form = Form::new()
            .part(self.config.upload_field_name.clone(), part)
            .text(
                self.config.correlation_field_name.clone(),
                upload.correlation_id,
            );

        tracing::debug!(url = %url, bytes = size, "Submitting upload");

        let response = self.client.post(url).multipart(form).send().await?;

        let submission: Submission = Self::read_envelope(response).await?.into_required_data()?;
        submission.validate()?;
        Ok(submission)
    }

    async fn fetch_task(&self, task_id: &TaskId) -> MealsmithResult<TaskSnapshot> {
        let url = self.task_url(task_id)?;
        let response = self.client.get(url).send().await?;
        Self::read_envelope(response).await?.into_required_data()
    }

    async fn fetch_tasks(&self, task_ids: &[TaskId]) -> MealsmithResult<Vec<TaskSnapshot>> {
        let url = self.batch_url(task_ids)?;
        let response = self.client.get(url).send().await?;

        let snapshots: Option<Vec<TaskSnapshot>> = Self::read_envelope(response).await?.into_data()?;
        Ok(snapshots.unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
