//! Turns a completed task's generic payload into a typed result.
//!
//! Missing fields are replaced with fixed defaults so a result can always be
//! shown, and every result records through [`DataSource`] whether it came
//! from the backend, partly from defaults, or entirely from defaults.

use crate::error::{MealsmithError, MealsmithResult};
use crate::task::{TaskKind, TaskPayload, TaskSnapshot};
use serde::{Deserialize, Serialize};

/// Glucose curve used when the backend sends none (mg/dL)
pub const DEFAULT_TREND_CURVE: [f64; 7] = [95.0, 125.0, 148.0, 138.0, 118.0, 102.0, 94.0];

/// Minutes between two samples of the default time axis
pub const TIME_AXIS_STEP_MINUTES: usize = 30;

/// Lower bound of the normal post-meal range (mg/dL)
pub const NORMAL_RANGE_LOW: f64 = 70.0;

/// Upper bound of the normal post-meal range (mg/dL)
pub const NORMAL_RANGE_HIGH: f64 = 140.0;

/// Peak above which a meal's impact counts as high (mg/dL)
pub const HIGH_IMPACT_PEAK: f64 = 180.0;

/// Title used when eating-order advice has none
pub const DEFAULT_ADVICE_TITLE: &str = "Suggested eating order";

/// Icon attached to every eating-order tip
pub const TIP_ICON: &str = "lightbulb";

/// How much of a typed result came from the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    /// Every field was reported
    Reported,
    /// Some fields were filled with defaults
    Partial,
    /// Nothing was reported; the result is entirely defaults
    Defaulted,
}

impl DataSource {
    fn from_presence(present: &[bool]) -> Self {
        if present.iter().all(|p| *p) {
            DataSource::Reported
        } else if present.iter().any(|p| *p) {
            DataSource::Partial
        } else {
            DataSource::Defaulted
        }
    }
}

/// Expected effect of a meal on blood glucose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactLevel {
    /// Peak stays within the normal range
    Low,
    /// Peak exceeds the normal range
    Moderate,
    /// Peak exceeds [`HIGH_IMPACT_PEAK`]
    High,
}

impl ImpactLevel {
    /// Classify a glucose peak.
    pub fn from_peak(peak: f64) -> Self {
        if peak > HIGH_IMPACT_PEAK {
            ImpactLevel::High
        } else if peak > NORMAL_RANGE_HIGH {
            ImpactLevel::Moderate
        } else {
            ImpactLevel::Low
        }
    }
}

/// Post-meal glucose forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseForecast {
    /// Highest forecast value
    pub peak_value: f64,
    /// Label of the sample where the peak happens
    pub peak_time: String,
    /// One label per sample
    pub time_axis: Vec<String>,
    /// Sampled values
    pub values: Vec<f64>,
    /// Derived from the peak
    pub impact: ImpactLevel,
    /// Normal range bounds `(low, high)`
    pub normal_range: (f64, f64),
    /// Where the data came from
    pub source: DataSource,
}

/// One eating-order step, ready for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviceTip {
    /// Position in the sequence
    pub order: u32,
    /// Short heading
    pub title: String,
    /// Longer explanation
    pub description: String,
    /// Dishes this step refers to
    pub foods: Vec<String>,
    /// Icon identifier
    pub icon: String,
}

/// Advice on the order in which to eat a meal's dishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EatingOrderAdvice {
    /// Heading
    pub title: String,
    /// Steps, in the order the backend sent them
    pub tips: Vec<AdviceTip>,
    /// Estimated improvement when following the advice
    pub expected_improvement: Option<String>,
    /// Where the data came from
    pub source: DataSource,
}

/// Typed result of one background task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// Result of a [`TaskKind::GlucoseTrend`] task
    GlucoseTrend(GlucoseForecast),
    /// Result of a [`TaskKind::EatingOrder`] task
    EatingOrder(EatingOrderAdvice),
}

impl TaskOutcome {
    /// Kind of task this result belongs to
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskOutcome::GlucoseTrend(_) => TaskKind::GlucoseTrend,
            TaskOutcome::EatingOrder(_) => TaskKind::EatingOrder,
        }
    }

    /// Where the data came from
    pub fn source(&self) -> DataSource {
        match self {
            TaskOutcome::GlucoseTrend(forecast) => forecast.source,
            TaskOutcome::EatingOrder(advice) => advice.source,
        }
    }
}

/// Transform the payload of a completed task of kind `kind`.
///
/// A missing payload is not an error; it yields an all-defaults result.
pub fn transform(kind: TaskKind, payload: Option<&TaskPayload>) -> MealsmithResult<TaskOutcome> {
    let empty = TaskPayload::default();
    let payload = payload.unwrap_or(&empty);

    match kind {
        TaskKind::GlucoseTrend => Ok(TaskOutcome::GlucoseTrend(glucose_forecast(payload))),
        TaskKind::EatingOrder => Ok(TaskOutcome::EatingOrder(eating_order_advice(payload))),
        TaskKind::NutritionReport => Err(MealsmithError::UnsupportedTaskKind {
            kind: kind.key().to_string(),
        }),
    }
}

/// Transform a completed snapshot that was spawned as `expected`.
///
/// A snapshot that names a different kind is rejected rather than read
/// under the wrong schema.
pub fn transform_snapshot(snapshot: &TaskSnapshot, expected: TaskKind) -> MealsmithResult<TaskOutcome> {
    if let Some(reported) = snapshot.kind() {
        if reported != expected {
            return Err(MealsmithError::invalid_response(format!(
                "task {} was tracked as {} but reports {}",
                snapshot.task_id, expected, reported
            )));
        }
    }
    transform(expected, snapshot.result.as_ref())
}

fn time_label(index: usize) -> String {
    format!("{}min", index * TIME_AXIS_STEP_MINUTES)
}

fn glucose_forecast(payload: &TaskPayload) -> GlucoseForecast {
    let reported_values = payload.trend_data.as_ref().filter(|values| !values.is_empty());
    let values = reported_values
        .cloned()
        .unwrap_or_else(|| DEFAULT_TREND_CURVE.to_vec());

    let reported_axis = payload
        .time_points
        .as_ref()
        .filter(|points| points.len() == values.len());
    let time_axis = reported_axis
        .cloned()
        .unwrap_or_else(|| (0..values.len()).map(time_label).collect());

    let peak_index = values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, _)| index)
        .unwrap_or_default();
    let peak_value = payload.peak_value.unwrap_or(values[peak_index]);
    let peak_time = payload
        .peak_time
        .clone()
        .unwrap_or_else(|| time_axis[peak_index].clone());

    let source = DataSource::from_presence(&[
        reported_values.is_some(),
        reported_axis.is_some(),
        payload.peak_value.is_some(),
        payload.peak_time.is_some(),
    ]);

    GlucoseForecast {
        peak_value,
        peak_time,
        time_axis,
        values,
        impact: ImpactLevel::from_peak(peak_value),
        normal_range: (NORMAL_RANGE_LOW, NORMAL_RANGE_HIGH),
        source,
    }
}

fn eating_order_advice(payload: &TaskPayload) -> EatingOrderAdvice {
    let tips = payload
        .tips
        .iter()
        .flatten()
        .map(|tip| AdviceTip {
            order: tip.order,
            title: tip.title.clone(),
            description: tip.description.clone(),
            foods: tip.foods.clone().unwrap_or_default(),
            icon: TIP_ICON.to_string(),
        })
        .collect();

    let source = DataSource::from_presence(&[payload.title.is_some(), payload.tips.is_some()]);

    EatingOrderAdvice {
        title: payload
            .title
            .clone()
            .unwrap_or_else(|| DEFAULT_ADVICE_TITLE.to_string()),
        tips,
        expected_improvement: payload.expected_improvement.clone(),
        source,
    }
}
