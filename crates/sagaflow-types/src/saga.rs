//! Saga domain types for sagaflow.
//!
//! Defines the saga lifecycle state machine (`SagaState`), the append-only
//! audit entries produced per step and per compensation
//! (`StepExecutionRecord`), and the checkpoint snapshot handed to state
//! stores (`SagaPersistedState`).

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Saga State
// ---------------------------------------------------------------------------

/// Lifecycle state of a saga execution.
///
/// ```text
/// NotStarted -> Running -> Completed
///                       -> Failed -> Compensating -> CompensationCompleted
///                                                 -> CompensationFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    NotStarted,
    Running,
    Completed,
    /// Terminal when compensation is disabled or nothing was compensatable,
    /// otherwise immediately followed by `Compensating`.
    Failed,
    Compensating,
    CompensationCompleted,
    CompensationFailed,
}

impl SagaState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SagaState) -> bool {
        matches!(
            (self, next),
            (SagaState::NotStarted, SagaState::Running)
                | (SagaState::Running, SagaState::Completed)
                | (SagaState::Running, SagaState::Failed)
                | (SagaState::Failed, SagaState::Compensating)
                | (SagaState::Compensating, SagaState::CompensationCompleted)
                | (SagaState::Compensating, SagaState::CompensationFailed)
        )
    }

    /// States in which `execute` may return.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SagaState::Completed
                | SagaState::Failed
                | SagaState::CompensationCompleted
                | SagaState::CompensationFailed
        )
    }

    /// Stable lowercase name, used as the persisted column value.
    pub fn as_str(self) -> &'static str {
        match self {
            SagaState::NotStarted => "not_started",
            SagaState::Running => "running",
            SagaState::Completed => "completed",
            SagaState::Failed => "failed",
            SagaState::Compensating => "compensating",
            SagaState::CompensationCompleted => "compensation_completed",
            SagaState::CompensationFailed => "compensation_failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SagaState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(SagaState::NotStarted),
            "running" => Ok(SagaState::Running),
            "completed" => Ok(SagaState::Completed),
            "failed" => Ok(SagaState::Failed),
            "compensating" => Ok(SagaState::Compensating),
            "compensation_completed" => Ok(SagaState::CompensationCompleted),
            "compensation_failed" => Ok(SagaState::CompensationFailed),
            other => Err(format!("unknown saga state: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Step Execution Record
// ---------------------------------------------------------------------------

/// One entry of the saga audit trail.
///
/// A forward record covers every attempt of one step (see `retry_count`); a
/// compensation record covers one compensation call. Records are never
/// mutated after they are appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    pub is_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Wall time across all attempts, in milliseconds.
    pub duration_ms: u64,
    /// Attempts made minus one. Always 0 for compensation records.
    pub retry_count: u32,
    pub is_compensation: bool,
    /// Payload the step returned on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl StepExecutionRecord {
    /// The step name when one was given, otherwise its id.
    pub fn display_name(&self) -> &str {
        self.step_name.as_deref().unwrap_or(&self.step_id)
    }
}

// ---------------------------------------------------------------------------
// Persisted snapshot
// ---------------------------------------------------------------------------

/// Checkpoint of saga progress handed to a `SagaStateStore`.
///
/// Written after every successful forward step when persistence is enabled,
/// deleted on successful completion, and kept on failure so operators can
/// inspect or manually replay the saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaPersistedState {
    pub saga_id: String,
    pub state: SagaState,
    /// Caller context serialized as JSON.
    pub context: serde_json::Value,
    /// Index of the next step to run.
    pub current_step_index: usize,
    /// Ids of steps whose forward action succeeded, in completion order.
    #[serde(default)]
    pub completed_steps: Vec<String>,
    /// Ids of steps whose compensation succeeded, in compensation order.
    #[serde(default)]
    pub compensated_steps: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaPersistedState {
    /// Deserialize the stored context back into the caller's type.
    pub fn context_as<C: DeserializeOwned>(&self) -> Result<C, serde_json::Error> {
        serde_json::from_value(self.context.clone())
    }
}
