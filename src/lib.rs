//! # Mealsmith
//!
//! An async client for meal-photo analysis backends that answer immediately
//! with a primary analysis and keep working on slower tasks in the background.
//!
//! ## Features
//!
//! - **One-shot Submission**: Upload a photo and get the primary analysis back
//! - **Independent Tracking**: Every background task is polled on its own and
//!   delivered as soon as it resolves
//! - **Bounded Polling**: Fixed interval with a shared attempt budget per task
//! - **Safe Defaults**: Missing payload fields are replaced and flagged
//! - **Pluggable Backends**: HTTP out of the box, scripted in-memory for tests
//!
//! ## Quick Start
//!
//! ```rust
//! use mealsmith::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> MealsmithResult<()> {
//!     let submission = Submission::new(serde_json::json!({"calories": 520}))
//!         .with_tasks(AsyncTasks::new().with(TaskKind::EatingOrder, "task-1"));
//!
//!     let backend = InMemoryBackend::new()
//!         .with_submission(submission)
//!         .with_task(
//!             "task-1",
//!             [TaskSnapshot::new("task-1", TaskKind::EatingOrder, TaskStatus::Completed)],
//!         );
//!
//!     let analyzer = MealAnalyzer::new(Arc::new(backend), MealsmithConfig::testing())?;
//!     let (submission, mut tracker) = analyzer
//!         .submit_and_track(Upload::new(vec![0xFF, 0xD8, 0xFF], "user-42"))
//!         .await?;
//!     assert_eq!(submission.analysis_result.as_value()["calories"], 520);
//!
//!     while let Some(result) = tracker.next().await {
//!         let outcome = result.outcome?;
//!         assert_eq!(outcome.source(), DataSource::Defaulted);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod task;
pub mod transform;

pub mod prelude {
    pub use crate::backend::{
        AnalysisResult, HttpBackend, InMemoryBackend, ScriptedResponse, SharedBackend, Submission,
        TaskBackend, Upload,
    };
    pub use crate::config::*;
    pub use crate::core::{
        MealAnalyzer, PollPolicy, SubmissionEvent, TaskPoller, TaskTracker, Timer, TokioTimer,
        TrackedResult,
    };
    pub use crate::error::{ErrorKind, MealsmithError, MealsmithResult};
    pub use crate::task::{AsyncTasks, TaskId, TaskKind, TaskPayload, TaskSnapshot, TaskStatus};
    pub use crate::transform::{
        DataSource, EatingOrderAdvice, GlucoseForecast, ImpactLevel, TaskOutcome,
    };
    pub use async_trait::async_trait;
}

pub use crate::backend::{Submission, TaskBackend, Upload};
pub use crate::config::*;
pub use crate::core::{MealAnalyzer, SubmissionEvent, TaskTracker, TrackedResult};
pub use crate::error::{ErrorKind, MealsmithError, MealsmithResult};
pub use crate::task::{TaskId, TaskKind, TaskSnapshot, TaskStatus};
pub use crate::transform::TaskOutcome;
pub use async_trait::async_trait;
