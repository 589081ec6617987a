//! Event types for the saga event bus.
//!
//! `SagaEvent` is broadcast by the orchestrator at lifecycle points. Events
//! are advisory: publishing them never affects control flow.

use serde::{Deserialize, Serialize};

use crate::saga::SagaState;

/// Events emitted during saga execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SagaEvent {
    SagaStarted {
        saga_id: String,
        step_count: usize,
    },

    StepStarted {
        saga_id: String,
        step_id: String,
        attempt: u32,
    },

    StepSucceeded {
        saga_id: String,
        step_id: String,
        duration_ms: u64,
    },

    StepFailed {
        saga_id: String,
        step_id: String,
        error: String,
        will_retry: bool,
    },

    CompensationPhaseStarted {
        saga_id: String,
        pending: usize,
    },

    CompensationStarted {
        saga_id: String,
        step_id: String,
    },

    CompensationSucceeded {
        saga_id: String,
        step_id: String,
        duration_ms: u64,
    },

    CompensationFailed {
        saga_id: String,
        step_id: String,
        error: String,
    },

    CompensationPhaseFinished {
        saga_id: String,
        all_succeeded: bool,
    },

    SagaFinished {
        saga_id: String,
        state: SagaState,
        duration_ms: u64,
    },
}

impl SagaEvent {
    /// The saga this event belongs to.
    pub fn saga_id(&self) -> &str {
        match self {
            SagaEvent::SagaStarted { saga_id, .. }
            | SagaEvent::StepStarted { saga_id, .. }
            | SagaEvent::StepSucceeded { saga_id, .. }
            | SagaEvent::StepFailed { saga_id, .. }
            | SagaEvent::CompensationPhaseStarted { saga_id, .. }
            | SagaEvent::CompensationStarted { saga_id, .. }
            | SagaEvent::CompensationSucceeded { saga_id, .. }
            | SagaEvent::CompensationFailed { saga_id, .. }
            | SagaEvent::CompensationPhaseFinished { saga_id, .. }
            | SagaEvent::SagaFinished { saga_id, .. } => saga_id,
        }
    }
}
