//! Step and saga result types.
//!
//! `StepResult` is the business outcome of one forward or compensation call.
//! `SagaResult` is the immutable summary returned by
//! [`SagaOrchestrator::execute`](super::orchestrator::SagaOrchestrator::execute).

use std::sync::Arc;
use std::time::Duration;

use sagaflow_types::saga::{SagaState, StepExecutionRecord};
use serde::Serialize;
use serde_json::Value;

/// What a step action produces.
///
/// `Ok(StepResult::failure(..))` is a failure the step reported itself;
/// `Err(e)` is an error raised while running the step. Both are retryable
/// and both end up as a failing [`StepResult`].
pub type StepOutcome = Result<StepResult, anyhow::Error>;

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// Business outcome of a step action.
///
/// A result is either a success (no error fields set) or a failure (an error
/// message, an error value, or both). The constructors are the only way to
/// build one, so that invariant always holds.
#[derive(Debug, Clone)]
pub struct StepResult {
    is_success: bool,
    error_message: Option<String>,
    error: Option<Arc<anyhow::Error>>,
    data: Option<Value>,
    skip_compensation: bool,
}

impl StepResult {
    pub fn success() -> Self {
        Self {
            is_success: true,
            error_message: None,
            error: None,
            data: None,
            skip_compensation: false,
        }
    }

    /// Success carrying a payload returned to the caller in the step's
    /// execution record. The payload is not passed to later steps.
    pub fn success_with(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::success()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            error_message: Some(message.into()),
            error: None,
            data: None,
            skip_compensation: false,
        }
    }

    /// Failure wrapping the error that caused it. The message is the error's
    /// full cause chain.
    pub fn from_error(error: anyhow::Error) -> Self {
        Self {
            is_success: false,
            error_message: Some(format!("{error:#}")),
            error: Some(Arc::new(error)),
            data: None,
            skip_compensation: false,
        }
    }

    /// Mark the result as leaving nothing to roll back, so this step is kept
    /// off the compensation stack even when it requires compensation.
    pub fn skipping_compensation(mut self) -> Self {
        self.skip_compensation = true;
        self
    }

    pub fn is_success(&self) -> bool {
        self.is_success
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_deref()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn skip_compensation(&self) -> bool {
        self.skip_compensation
    }

    pub(crate) fn into_data(self) -> Option<Value> {
        self.data
    }

    /// Message for logs and records; failures without text fall back to a
    /// generic description.
    pub(crate) fn describe_failure(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| "step reported failure".to_string())
    }
}

// ---------------------------------------------------------------------------
// SagaResult
// ---------------------------------------------------------------------------

/// Final outcome of one saga execution.
///
/// `is_success` is true exactly when `state` is [`SagaState::Completed`].
#[derive(Debug, Clone, Serialize)]
pub struct SagaResult<C> {
    pub saga_id: String,
    pub is_success: bool,
    /// The caller's context after every step and compensation ran.
    pub context: C,
    /// Forward records, in execution order.
    pub step_results: Vec<StepExecutionRecord>,
    /// Compensation records, in rollback (reverse completion) order.
    pub compensation_results: Vec<StepExecutionRecord>,
    pub failed_step_id: Option<String>,
    pub error_message: Option<String>,
    #[serde(rename = "total_duration_ms", serialize_with = "serialize_duration_ms")]
    pub total_duration: Duration,
    pub state: SagaState,
}

impl<C> SagaResult<C> {
    /// One line per record: `+` executed, `x` failed, `<` compensated,
    /// `!` compensation failed.
    pub fn summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.step_results.len() + self.compensation_results.len());
        for record in self.step_results.iter().chain(&self.compensation_results) {
            let marker = match (record.is_compensation, record.is_success) {
                (false, true) => "+",
                (false, false) => "x",
                (true, true) => "<",
                (true, false) => "!",
            };
            lines.push(format!("{marker} {}", record.display_name()));
        }
        lines.join("\n")
    }

    /// Ids of steps whose compensation succeeded, in rollback order.
    pub fn compensated_step_ids(&self) -> Vec<&str> {
        self.compensation_results
            .iter()
            .filter(|r| r.is_success)
            .map(|r| r.step_id.as_str())
            .collect()
    }
}

fn serialize_duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
