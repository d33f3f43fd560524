//! Error types for Mealsmith operations.

use crate::task::TaskId;
use thiserror::Error;

/// Result type used throughout Mealsmith.
pub type MealsmithResult<T> = Result<T, MealsmithError>;

/// Boxed underlying error attached to a [`MealsmithError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for Mealsmith operations.
#[derive(Error, Debug)]
pub enum MealsmithError {
    /// The request could not be constructed
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error message
        message: String,
    },

    /// The network call itself did not complete
    #[error("Transport failure: {message}")]
    TransportFailure {
        /// Error message
        message: String,
        /// Underlying error
        #[source]
        source: Option<BoxError>,
    },

    /// A response arrived but was not a success or could not be parsed
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Error message
        message: String,
        /// HTTP status, when the response was rejected at the HTTP level
        status: Option<u16>,
        /// Optional underlying error
        #[source]
        source: Option<BoxError>,
    },

    /// The backend answered with an envelope code other than 200
    #[error("{message} (code {code})")]
    ApplicationError {
        /// Envelope code
        code: i64,
        /// Backend supplied, human-readable message
        message: String,
    },

    /// The polled task reached `FAILED`
    #[error("Task {task_id} failed: {message}")]
    TaskFailed {
        /// The failed task
        task_id: TaskId,
        /// Reported error message, or a generic one
        message: String,
    },

    /// The polled task reached `CANCELLED`
    #[error("Task {task_id} was cancelled")]
    TaskCancelled {
        /// The cancelled task
        task_id: TaskId,
    },

    /// The attempt budget ran out while the task was still non-terminal
    #[error("Task {task_id} did not finish after {attempts} attempts")]
    PollingTimeout {
        /// The task being polled
        task_id: TaskId,
        /// Number of status queries issued
        attempts: u32,
        /// Last transient error seen while polling, kept for diagnostics
        #[source]
        last_error: Option<Box<MealsmithError>>,
    },

    /// A task kind that has no result transformer yet
    #[error("No result transformer for task kind '{kind}'")]
    UnsupportedTaskKind {
        /// Wire name of the kind
        kind: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },
}

/// Flat classification of a [`MealsmithError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`MealsmithError::InvalidRequest`]
    InvalidRequest,
    /// See [`MealsmithError::TransportFailure`]
    TransportFailure,
    /// See [`MealsmithError::InvalidResponse`]
    InvalidResponse,
    /// See [`MealsmithError::ApplicationError`]
    ApplicationError,
    /// See [`MealsmithError::TaskFailed`]
    TaskFailed,
    /// See [`MealsmithError::TaskCancelled`]
    TaskCancelled,
    /// See [`MealsmithError::PollingTimeout`]
    PollingTimeout,
    /// See [`MealsmithError::UnsupportedTaskKind`]
    UnsupportedTaskKind,
    /// See [`MealsmithError::Config`]
    Config,
}

impl MealsmithError {
    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a transport failure wrapping its cause
    pub fn transport<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TransportFailure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid response error without an underlying cause
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Create an invalid response error for a non-success HTTP status
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
            status: Some(status),
            source: None,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::TransportFailure { .. } => ErrorKind::TransportFailure,
            Self::InvalidResponse { .. } | Self::Serialization(_) => ErrorKind::InvalidResponse,
            Self::ApplicationError { .. } => ErrorKind::ApplicationError,
            Self::TaskFailed { .. } => ErrorKind::TaskFailed,
            Self::TaskCancelled { .. } => ErrorKind::TaskCancelled,
            Self::PollingTimeout { .. } => ErrorKind::PollingTimeout,
            Self::UnsupportedTaskKind { .. } => ErrorKind::UnsupportedTaskKind,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// HTTP status attached to this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::InvalidResponse { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether a poller may retry after this error.
    ///
    /// Only transient observation failures qualify: the request never
    /// completed, the body could not be parsed, or the server answered 5xx.
    /// A 4xx answer is definite and surfaced immediately, like everything
    /// else.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportFailure { .. } | Self::Serialization(_) => true,
            Self::InvalidResponse { status, .. } => status.is_none_or(|code| code >= 500),
            _ => false,
        }
    }

    /// Text suitable for showing to an end user.
    ///
    /// Backend and task messages are meant to be read by people and pass
    /// through unchanged. Diagnostic errors are replaced by `fallback`, which
    /// the caller supplies already localized.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::ApplicationError { message, .. } | Self::TaskFailed { message, .. } => {
                message.clone()
            }
            Self::TaskCancelled { .. } => TASK_CANCELLED_MESSAGE.to_string(),
            _ => fallback.to_string(),
        }
    }
}

/// Message reported for tasks that reached `CANCELLED`.
pub const TASK_CANCELLED_MESSAGE: &str = "Task was cancelled";

/// Message reported for `FAILED` tasks that carried no error message.
pub const TASK_FAILED_FALLBACK_MESSAGE: &str = "Task failed";

impl From<reqwest::Error> for MealsmithError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_builder() {
            Self::InvalidRequest {
                message: error.to_string(),
            }
        } else if error.is_decode() || error.is_status() {
            Self::InvalidResponse {
                message: error.to_string(),
                status: error.status().map(|status| status.as_u16()),
                source: Some(Box::new(error)),
            }
        } else {
            let message = if error.is_timeout() {
                "request timed out".to_string()
            } else {
                error.to_string()
            };
            Self::transport(message, error)
        }
    }
}
