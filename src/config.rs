//! Configuration types for Mealsmith.
//!
//! This module contains all configuration structures used throughout Mealsmith,
//! including backend connection settings, polling policy, and logging.

use crate::error::{MealsmithError, MealsmithResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for Mealsmith.
///
/// # Examples
///
/// ```rust
/// use mealsmith::config::{MealsmithConfig, PollingConfig};
///
/// // Use default configuration
/// let config = MealsmithConfig::default();
///
/// // Custom configuration
/// let config = MealsmithConfig {
///     polling: PollingConfig {
///         interval_ms: 500,
///         max_attempts: 60,
///         ..Default::default()
///     },
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MealsmithConfig {
    /// Backend connection configuration
    pub client: ClientConfig,

    /// Task polling policy
    pub polling: PollingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Backend connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the backend, without a trailing slash
    pub base_url: String,

    /// Path of the submission endpoint
    pub upload_path: String,

    /// Path prefix of the task status endpoints
    pub task_path: String,

    /// Whole-request timeout (in seconds)
    pub request_timeout_secs: u64,

    /// Connection establishment timeout (in seconds)
    pub connect_timeout_secs: u64,

    /// Multipart field carrying the image
    pub upload_field_name: String,

    /// Multipart field carrying the correlation identifier
    pub correlation_field_name: String,

    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            upload_path: "/upload".to_string(),
            task_path: "/task".to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            upload_field_name: "file".to_string(),
            correlation_field_name: "userId".to_string(),
            user_agent: concat!("mealsmith/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    /// Create a client configuration for a specific backend.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout_secs: u64) -> Self {
        self.request_timeout_secs = timeout_secs;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout_secs: u64) -> Self {
        self.connect_timeout_secs = timeout_secs;
        self
    }
}

/// Task polling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Wait between two status queries of the same task (in milliseconds)
    pub interval_ms: u64,

    /// Maximum number of status queries per task, shared between pending
    /// observations and transient failures
    pub max_attempts: u32,

    /// Capacity of the channel delivering tracked results
    pub result_channel_capacity: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1500,
            max_attempts: 30,
            result_channel_capacity: 16,
        }
    }
}

impl PollingConfig {
    /// Create a polling configuration with a fixed interval and budget.
    pub fn fixed(interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            interval_ms,
            max_attempts,
            ..Default::default()
        }
    }

    /// The poll interval as a [`Duration`]
    pub fn interval(&self) -> Duration {
        self.interval_ms.millis()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: LogLevel,

    /// Enable structured JSON logging
    pub json_format: bool,

    /// Enable colored output (ignored if json_format is true)
    pub colored: bool,

    /// Include timestamps in logs
    pub include_timestamps: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            colored: true,
            include_timestamps: true,
            include_targets: false,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = MealsmithError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(MealsmithError::config(format!("unknown log level '{other}'"))),
        }
    }
}

/// Helper trait for converting durations in configuration.
pub trait DurationExt {
    /// Convert seconds to Duration
    fn secs(self) -> Duration;
    /// Convert milliseconds to Duration
    fn millis(self) -> Duration;
}

impl DurationExt for u64 {
    fn secs(self) -> Duration {
        Duration::from_secs(self)
    }

    fn millis(self) -> Duration {
        Duration::from_millis(self)
    }
}

impl MealsmithConfig {
    /// Create a new configuration optimized for development.
    pub fn development() -> Self {
        Self {
            client: ClientConfig {
                request_timeout_secs: 60,
                ..Default::default()
            },
            polling: PollingConfig::default(),
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: true,
                include_targets: true,
                ..Default::default()
            },
        }
    }

    /// Create a new configuration optimized for production.
    pub fn production() -> Self {
        Self {
            client: ClientConfig {
                request_timeout_secs: 20,
                connect_timeout_secs: 5,
                ..Default::default()
            },
            polling: PollingConfig {
                result_channel_capacity: 32,
                ..Default::default()
            },
            logging: LoggingConfig {
                level: LogLevel::Info,
                json_format: true,
                colored: false,
                include_timestamps: true,
                include_targets: false,
            },
        }
    }

    /// Create a configuration for testing.
    pub fn testing() -> Self {
        Self {
            client: ClientConfig {
                request_timeout_secs: 5,
                connect_timeout_secs: 1,
                ..Default::default()
            },
            polling: PollingConfig::fixed(10, 5),
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: false,
                include_timestamps: false,
                include_targets: true,
                ..Default::default()
            },
        }
    }

    /// Build a configuration from defaults overlaid with `MEALSMITH_*`
    /// environment variables.
    pub fn from_env() -> MealsmithResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> MealsmithResult<Self> {
        let mut config = Self::default();

        if let Some(base_url) = lookup("MEALSMITH_BASE_URL") {
            config.client.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(interval) = lookup("MEALSMITH_POLL_INTERVAL_MS") {
            config.polling.interval_ms = interval.parse().map_err(|_| {
                MealsmithError::config(format!("MEALSMITH_POLL_INTERVAL_MS is not a number: {interval}"))
            })?;
        }
        if let Some(attempts) = lookup("MEALSMITH_POLL_MAX_ATTEMPTS") {
            config.polling.max_attempts = attempts.parse().map_err(|_| {
                MealsmithError::config(format!("MEALSMITH_POLL_MAX_ATTEMPTS is not a number: {attempts}"))
            })?;
        }
        if let Some(level) = lookup("MEALSMITH_LOG_LEVEL") {
            config.logging.level = level.parse()?;
        }

        Ok(config)
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Validate client config
        let base_url = self.client.base_url.as_str();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            errors.push(format!("Base URL must be http(s): '{base_url}'"));
        }

        if base_url.ends_with('/') {
            errors.push("Base URL must not end with '/'".to_string());
        }

        for (name, path) in [
            ("Upload path", &self.client.upload_path),
            ("Task path", &self.client.task_path),
        ] {
            if !path.starts_with('/') {
                errors.push(format!("{name} must start with '/'"));
            }
        }

        if self.client.request_timeout_secs == 0 {
            errors.push("Request timeout must be greater than 0".to_string());
        }

        if self.client.upload_field_name.is_empty() {
            errors.push("Upload field name must not be empty".to_string());
        }

        // Validate polling config
        if self.polling.max_attempts == 0 {
            errors.push("Polling max attempts must be greater than 0".to_string());
        }

        if self.polling.result_channel_capacity == 0 {
            errors.push("Result channel capacity must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
