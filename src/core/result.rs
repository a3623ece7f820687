//! Outcomes of executed assignments.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::assignment::AgentKind;

/// Quality signals reported for one result.
///
/// Values are stored as reported; scoring clamps each one into its nominal
/// range before use.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoringMetrics {
    /// Share of tests passing, [0, 1].
    pub test_success_rate: f64,
    /// Share of lint checks passing, [0, 1].
    pub lint_pass_rate: f64,
    /// Performance change, [-1, 1]; negative is a regression.
    pub performance_delta: f64,
    /// Risk of the change, [0, 1]; lower is better.
    pub change_risk: f64,
    /// Readability, [0, 1].
    pub readability: f64,
    /// Security, [0, 1].
    pub security: f64,
}

impl ScoringMetrics {
    /// Copy of these metrics with every value forced into its nominal range.
    /// NaN is treated as the range's lower bound.
    pub fn clamped(&self) -> Self {
        Self {
            test_success_rate: clamp(self.test_success_rate, 0.0, 1.0),
            lint_pass_rate: clamp(self.lint_pass_rate, 0.0, 1.0),
            performance_delta: clamp(self.performance_delta, -1.0, 1.0),
            change_risk: clamp(self.change_risk, 0.0, 1.0),
            readability: clamp(self.readability, 0.0, 1.0),
            security: clamp(self.security, 0.0, 1.0),
        }
    }
}

pub(crate) fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

/// What an executor reports back for one assignment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub metrics: ScoringMetrics,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn success(output: impl Into<String>, metrics: ScoringMetrics) -> Self {
        Self {
            success: true,
            output: output.into(),
            metrics,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            metrics: ScoringMetrics::default(),
            error: Some(error.into()),
        }
    }
}

/// The immutable record of one executed assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub step_id: String,
    pub agent_type: AgentKind,
    pub success: bool,
    pub output: String,
    pub metrics: ScoringMetrics,
    /// Set only when `success` is false.
    pub error: Option<String>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl TaskResult {
    /// Build the record for a finished step. An error message on a successful
    /// outcome is dropped; a failed outcome always carries one.
    pub fn from_outcome(
        step_id: &str,
        agent_type: AgentKind,
        outcome: TaskOutcome,
        duration: Duration,
    ) -> Self {
        let error = if outcome.success {
            None
        } else {
            Some(
                outcome
                    .error
                    .unwrap_or_else(|| "task reported failure".to_string()),
            )
        };
        Self {
            step_id: step_id.to_string(),
            agent_type,
            success: outcome.success,
            output: outcome.output,
            metrics: outcome.metrics,
            error,
            duration,
        }
    }

    pub fn failed(step_id: &str, agent_type: AgentKind, error: String, duration: Duration) -> Self {
        Self::from_outcome(step_id, agent_type, TaskOutcome::failure(error), duration)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
