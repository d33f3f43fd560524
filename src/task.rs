//! Task model: identifiers, kinds, the status state machine and the
//! snapshots the backend reports for each background task.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a task, assigned by the backend
pub type TaskId = String;

/// Status of a background task as reported by the backend.
///
/// `Pending` and `Running` are live; the other three are terminal and a task
/// never leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskStatus {
    /// Task is waiting to be picked up
    #[default]
    Pending,
    /// Task is being processed
    Running,
    /// Task finished and carries a result
    Completed,
    /// Task finished with an error
    Failed,
    /// Task was cancelled on the backend
    Cancelled,
}

impl TaskStatus {
    /// Parse a wire status. Unknown values are treated as `Pending`.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            other => {
                tracing::debug!(status = other, "Unrecognized task status, assuming PENDING");
                Self::Pending
            }
        }
    }

    /// The exact wire spelling of this status
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether no further transition can happen from this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a later observation may report `next` after `self`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        match (self, next) {
            (Self::Running, Self::Pending) => false,
            _ => true,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire_str())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.as_deref().map(Self::from_wire).unwrap_or_default())
    }
}

/// The closed set of background task kinds a submission can spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    /// Post-meal glucose trend forecast
    GlucoseTrend,
    /// Advice on the order in which to eat the dishes
    EatingOrder,
    /// Reserved; the backend does not produce it yet
    NutritionReport,
}

impl TaskKind {
    /// All kinds, in slot order
    pub const ALL: [TaskKind; 3] = [
        TaskKind::GlucoseTrend,
        TaskKind::EatingOrder,
        TaskKind::NutritionReport,
    ];

    /// Key used for this kind in a submission's `asyncTasks` map
    pub fn key(&self) -> &'static str {
        match self {
            Self::GlucoseTrend => "glucoseTrend",
            Self::EatingOrder => "eatingOrder",
            Self::NutritionReport => "nutritionReport",
        }
    }

    /// Whether the result transformer understands this kind
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::NutritionReport)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    /// Accepts `glucoseTrend`, `glucose_trend`, `GLUCOSE_TREND` and similar.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "glucosetrend" => Ok(Self::GlucoseTrend),
            "eatingorder" => Ok(Self::EatingOrder),
            "nutritionreport" => Ok(Self::NutritionReport),
            _ => Err(format!("unknown task kind '{s}'")),
        }
    }
}

/// Task ids spawned by one submission, one optional slot per [`TaskKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsyncTasks {
    slots: BTreeMap<TaskKind, TaskId>,
}

impl AsyncTasks {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, kind: TaskKind, task_id: impl Into<TaskId>) -> Self {
        self.insert(kind, task_id);
        self
    }

    /// Set the task id for `kind`, replacing any previous one
    pub fn insert(&mut self, kind: TaskKind, task_id: impl Into<TaskId>) {
        self.slots.insert(kind, task_id.into());
    }

    /// Task id spawned for `kind`, if any
    pub fn get(&self, kind: TaskKind) -> Option<&TaskId> {
        self.slots.get(&kind)
    }

    /// True when no background work was spawned
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of spawned tasks
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over `(kind, task id)` pairs in slot order
    pub fn iter(&self) -> impl Iterator<Item = (TaskKind, &TaskId)> {
        self.slots.iter().map(|(kind, id)| (*kind, id))
    }

    /// All spawned task ids in slot order
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.slots.values().cloned().collect()
    }
}

impl Serialize for AsyncTasks {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.slots.len()))?;
        for (kind, id) in &self.slots {
            map.serialize_entry(kind.key(), id)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AsyncTasks {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<BTreeMap<String, Option<String>>>::deserialize(deserializer)?;
        let mut tasks = AsyncTasks::new();
        for (key, id) in raw.unwrap_or_default() {
            let Some(id) = id.filter(|id| !id.is_empty()) else {
                continue;
            };
            match key.parse::<TaskKind>() {
                Ok(kind) => tasks.insert(kind, id),
                Err(_) => tracing::debug!(key = %key, task_id = %id, "Ignoring unknown async task key"),
            }
        }
        Ok(tasks)
    }
}

/// One step of eating-order advice, as sent by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipEntry {
    /// Position of this step in the sequence
    #[serde(default)]
    pub order: u32,
    /// Short heading
    #[serde(default)]
    pub title: String,
    /// Longer explanation
    #[serde(default)]
    pub description: String,
    /// Dishes this step refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foods: Option<Vec<String>>,
}

/// Loosely-typed result bag of a completed task.
///
/// Which fields are meaningful depends on the owning task's kind; read it
/// through [`crate::transform`] rather than directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    // glucose trend
    /// Highest forecast glucose value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_value: Option<f64>,
    /// When the peak happens, as a label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_time: Option<String>,
    /// Sampled glucose values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_data: Option<Vec<f64>>,
    /// Sample time labels matching `trend_data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_points: Option<Vec<String>>,

    // eating order
    /// Advice heading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Ordered advice steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tips: Option<Vec<TipEntry>>,
    /// Estimated improvement when following the advice
    #[serde(
        default,
        alias = "improvement",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_improvement: Option<String>,

    /// Fields no schema claims
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Point-in-time view of one background task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// Task identifier
    pub task_id: TaskId,
    /// Raw kind as sent by the backend
    #[serde(default)]
    pub task_type: String,
    /// Current status
    #[serde(default)]
    pub status: TaskStatus,
    /// Result payload, present once completed
    #[serde(default)]
    pub result: Option<TaskPayload>,
    /// When the backend created the task
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure reason, present once failed
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TaskSnapshot {
    /// Create a snapshot with only an id, kind and status
    pub fn new(task_id: impl Into<TaskId>, kind: TaskKind, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: kind.key().to_string(),
            status,
            result: None,
            created_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Attach a result payload
    pub fn with_result(mut self, result: TaskPayload) -> Self {
        self.result = Some(result);
        self
    }

    /// Attach an error message
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Parsed kind, if the backend sent a recognized one
    pub fn kind(&self) -> Option<TaskKind> {
        self.task_type.parse().ok()
    }

    /// Whether the task has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check that `next` is a legal later observation of this same task.
    pub fn observe(&self, next: &TaskSnapshot) -> Result<(), String> {
        if next.task_id != self.task_id {
            return Err(format!(
                "snapshot for {} cannot follow {}",
                next.task_id, self.task_id
            ));
        }
        if !self.status.can_transition_to(next.status) {
            return Err(format!(
                "task {} moved from {} to {}",
                self.task_id, self.status, next.status
            ));
        }
        Ok(())
    }
}

/// Accepts RFC 3339, a few naive formats and epoch milliseconds; anything
/// else becomes `None` instead of failing the whole snapshot.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| parse_timestamp(&value)))
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(|naive| naive.and_utc())
        }
        serde_json::Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_wire_values() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::from_wire(status.as_wire_str()), status);
        }
        assert_eq!(TaskStatus::from_wire("completed"), TaskStatus::Pending);
        assert_eq!(TaskStatus::from_wire("QUEUED"), TaskStatus::Pending);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let terminal = [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled];
        for from in terminal {
            assert!(from.is_terminal());
            for to in [TaskStatus::Pending, TaskStatus::Running] {
                assert!(!from.can_transition_to(to));
            }
            for to in terminal.iter().filter(|to| **to != from) {
                assert!(!from.can_transition_to(*to));
            }
        }
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_task_kind_parsing() {
        assert_eq!("glucoseTrend".parse(), Ok(TaskKind::GlucoseTrend));
        assert_eq!("GLUCOSE_TREND".parse(), Ok(TaskKind::GlucoseTrend));
        assert_eq!("eating-order".parse(), Ok(TaskKind::EatingOrder));
        assert!("calories".parse::<TaskKind>().is_err());
        assert!(!TaskKind::NutritionReport.is_supported());
    }

    #[test]
    fn test_async_tasks_ignores_unknown_keys() {
        let tasks: AsyncTasks = serde_json::from_value(json!({
            "glucoseTrend": "t1",
            "eatingOrder": "t2",
            "somethingElse": "t3",
            "nutritionReport": null
        }))
        .unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks.get(TaskKind::GlucoseTrend).map(String::as_str), Some("t1"));
        assert_eq!(tasks.get(TaskKind::EatingOrder).map(String::as_str), Some("t2"));
        assert!(tasks.get(TaskKind::NutritionReport).is_none());

        let empty: AsyncTasks = serde_json::from_value(json!(null)).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_snapshot_parsing() {
        let snapshot: TaskSnapshot = serde_json::from_value(json!({
            "taskId": "t1",
            "taskType": "GLUCOSE_TREND",
            "status": "COMPLETED",
            "result": {"peakValue": 148, "trendData": [95, 125, 148], "unrelated": true},
            "createdAt": "2024-05-01T12:00:00Z",
            "completedAt": "2024-05-01 12:00:03",
            "errorMessage": null
        }))
        .unwrap();

        assert_eq!(snapshot.kind(), Some(TaskKind::GlucoseTrend));
        assert!(snapshot.is_terminal());
        let result = snapshot.result.unwrap();
        assert_eq!(result.peak_value, Some(148.0));
        assert_eq!(result.trend_data, Some(vec![95.0, 125.0, 148.0]));
        assert!(result.extra.contains_key("unrelated"));
        assert!(snapshot.created_at.is_some());
        assert!(snapshot.completed_at.is_some());
    }

    #[test]
    fn test_snapshot_is_lenient() {
        let snapshot: TaskSnapshot = serde_json::from_value(json!({
            "taskId": "t9",
            "status": "SOMETHING_NEW",
            "createdAt": "yesterday"
        }))
        .unwrap();

        assert_eq!(snapshot.status, TaskStatus::Pending);
        assert_eq!(snapshot.kind(), None);
        assert!(snapshot.created_at.is_none());
    }

    #[test]
    fn test_observe_rejects_leaving_terminal_state() {
        let done = TaskSnapshot::new("t1", TaskKind::EatingOrder, TaskStatus::Completed);
        let again = TaskSnapshot::new("t1", TaskKind::EatingOrder, TaskStatus::Running);
        assert!(done.observe(&again).is_err());

        let pending = TaskSnapshot::new("t1", TaskKind::EatingOrder, TaskStatus::Pending);
        assert!(pending.observe(&done).is_ok());

        let other = TaskSnapshot::new("t2", TaskKind::EatingOrder, TaskStatus::Completed);
        assert!(pending.observe(&other).is_err());
    }
}
