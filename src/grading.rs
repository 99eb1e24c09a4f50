use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sandbox::ExecutionState;

/// Grades live on the 0–20 scale throughout.
pub const MAX_GRADE: f64 = 20.0;

#[derive(Debug, Error)]
pub enum GradingError {
    #[error("grading weights must be non-negative with a positive sum, got {0}")]
    InvalidWeights(f64),
}

/// Relative weights of the three sub-scores.
///
/// Weights are normalized before use: any non-negative triple with a positive
/// sum is accepted and rescaled to sum to 1.0. Negative or all-zero weights
/// are rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradingWeights {
    pub code: f64,
    pub execution: f64,
    pub documentation: f64,
}

impl Default for GradingWeights {
    fn default() -> Self {
        Self {
            code: 0.40,
            execution: 0.30,
            documentation: 0.30,
        }
    }
}

impl GradingWeights {
    pub fn normalized(self) -> Result<Self, GradingError> {
        let sum = self.code + self.execution + self.documentation;
        if !sum.is_finite()
            || sum <= 0.0
            || self.code < 0.0
            || self.execution < 0.0
            || self.documentation < 0.0
        {
            return Err(GradingError::InvalidWeights(sum));
        }
        Ok(Self {
            code: self.code / sum,
            execution: self.execution / sum,
            documentation: self.documentation / sum,
        })
    }
}

/// Institution-tunable grading policy: the weights plus the score each
/// execution state earns. The numbers here are defaults illustrating the
/// intended ordering, not constants of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingPolicy {
    pub weights: GradingWeights,
    pub timed_out_score: f64,
    pub crashed_score: f64,
    pub error_output_score: f64,
    pub success_base_score: f64,
    pub speed_bonus_cap: f64,
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            weights: GradingWeights::default(),
            timed_out_score: 5.0,
            crashed_score: 6.0,
            error_output_score: 12.0,
            success_base_score: 15.0,
            speed_bonus_cap: 5.0,
        }
    }
}

/// The three weighted sub-scores and the final grade. The terminal artifact
/// of one evaluation, handed to exporters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeBreakdown {
    pub code_score: f64,
    pub execution_score: f64,
    pub documentation_score: f64,
    pub weights: GradingWeights,
    pub final_grade: f64,
}

/// Execution sub-score for a classified outcome.
///
/// Successful runs earn a speed bonus shrinking linearly from the cap (at
/// instantaneous execution) to zero at the language's performance baseline.
pub fn execution_score(
    state: ExecutionState,
    duration: Duration,
    baseline: Duration,
    policy: &GradingPolicy,
) -> f64 {
    let score = match state {
        ExecutionState::NotAttempted | ExecutionState::CompileFailed => 0.0,
        ExecutionState::TimedOut => policy.timed_out_score,
        ExecutionState::Crashed => policy.crashed_score,
        ExecutionState::RanWithErrorOutput => policy.error_output_score,
        ExecutionState::RanSuccessfully => {
            policy.success_base_score + speed_bonus(duration, baseline, policy.speed_bonus_cap)
        }
    };
    score.clamp(0.0, MAX_GRADE)
}

fn speed_bonus(duration: Duration, baseline: Duration, cap: f64) -> f64 {
    if baseline.is_zero() {
        return 0.0;
    }
    let ratio = duration.as_secs_f64() / baseline.as_secs_f64();
    (cap * (1.0 - ratio)).clamp(0.0, cap)
}

/// Combines the execution outcome with the externally supplied static-code
/// and documentation sub-scores into the final weighted grade.
pub fn score(
    state: ExecutionState,
    duration: Duration,
    baseline: Duration,
    code_score: f64,
    documentation_score: f64,
    policy: &GradingPolicy,
) -> Result<GradeBreakdown, GradingError> {
    let weights = policy.weights.normalized()?;
    let code_score = code_score.clamp(0.0, MAX_GRADE);
    let documentation_score = documentation_score.clamp(0.0, MAX_GRADE);
    let execution_score = execution_score(state, duration, baseline, policy);

    let final_grade = (code_score * weights.code
        + execution_score * weights.execution
        + documentation_score * weights.documentation)
        .clamp(0.0, MAX_GRADE);

    Ok(GradeBreakdown {
        code_score,
        execution_score,
        documentation_score,
        weights,
        final_grade,
    })
}
