//! Diagnostic hooks for one saga execution.
//!
//! Every lifecycle point emits a structured `tracing` event and, when an
//! event bus is attached, publishes the matching `SagaEvent`. Nothing here
//! influences control flow.

use sagaflow_types::event::SagaEvent;
use sagaflow_types::saga::SagaState;

use crate::event::SagaEventBus;

pub(crate) struct Telemetry<'a> {
    saga_id: &'a str,
    bus: Option<&'a SagaEventBus>,
}

impl<'a> Telemetry<'a> {
    pub(crate) fn new(saga_id: &'a str, bus: Option<&'a SagaEventBus>) -> Self {
        Self { saga_id, bus }
    }

    fn publish(&self, event: SagaEvent) {
        if let Some(bus) = self.bus {
            bus.publish(event);
        }
    }

    pub(crate) fn saga_started(&self, step_count: usize) {
        tracing::info!(saga_id = self.saga_id, step_count, "saga started");
        self.publish(SagaEvent::SagaStarted {
            saga_id: self.saga_id.to_string(),
            step_count,
        });
    }

    pub(crate) fn step_attempt_started(&self, step_id: &str, attempt: u32) {
        tracing::debug!(saga_id = self.saga_id, step_id, attempt, "step attempt started");
        self.publish(SagaEvent::StepStarted {
            saga_id: self.saga_id.to_string(),
            step_id: step_id.to_string(),
            attempt,
        });
    }

    pub(crate) fn step_succeeded(&self, step_id: &str, duration_ms: u64, retry_count: u32) {
        tracing::info!(
            saga_id = self.saga_id,
            step_id,
            duration_ms,
            retry_count,
            "step succeeded"
        );
        self.publish(SagaEvent::StepSucceeded {
            saga_id: self.saga_id.to_string(),
            step_id: step_id.to_string(),
            duration_ms,
        });
    }

    pub(crate) fn step_attempt_failed(&self, step_id: &str, attempt: u32, error: &str, will_retry: bool) {
        if will_retry {
            tracing::debug!(saga_id = self.saga_id, step_id, attempt, error, "step attempt failed, retrying");
        } else {
            tracing::warn!(saga_id = self.saga_id, step_id, attempt, error, "step failed");
        }
        self.publish(SagaEvent::StepFailed {
            saga_id: self.saga_id.to_string(),
            step_id: step_id.to_string(),
            error: error.to_string(),
            will_retry,
        });
    }

    pub(crate) fn compensation_phase_started(&self, pending: usize) {
        tracing::info!(saga_id = self.saga_id, pending, "compensation phase started");
        self.publish(SagaEvent::CompensationPhaseStarted {
            saga_id: self.saga_id.to_string(),
            pending,
        });
    }

    pub(crate) fn compensation_started(&self, step_id: &str) {
        tracing::debug!(saga_id = self.saga_id, step_id, "compensation started");
        self.publish(SagaEvent::CompensationStarted {
            saga_id: self.saga_id.to_string(),
            step_id: step_id.to_string(),
        });
    }

    pub(crate) fn compensation_succeeded(&self, step_id: &str, duration_ms: u64) {
        tracing::info!(saga_id = self.saga_id, step_id, duration_ms, "compensation succeeded");
        self.publish(SagaEvent::CompensationSucceeded {
            saga_id: self.saga_id.to_string(),
            step_id: step_id.to_string(),
            duration_ms,
        });
    }

    pub(crate) fn compensation_failed(&self, step_id: &str, error: &str) {
        tracing::error!(saga_id = self.saga_id, step_id, error, "compensation failed");
        self.publish(SagaEvent::CompensationFailed {
            saga_id: self.saga_id.to_string(),
            step_id: step_id.to_string(),
            error: error.to_string(),
        });
    }

    pub(crate) fn compensation_phase_finished(&self, all_succeeded: bool) {
        tracing::info!(saga_id = self.saga_id, all_succeeded, "compensation phase finished");
        self.publish(SagaEvent::CompensationPhaseFinished {
            saga_id: self.saga_id.to_string(),
            all_succeeded,
        });
    }

    pub(crate) fn saga_finished(&self, state: SagaState, duration_ms: u64, error: Option<&str>) {
        match error {
            None => tracing::info!(saga_id = self.saga_id, %state, duration_ms, "saga finished"),
            Some(error) => tracing::warn!(saga_id = self.saga_id, %state, duration_ms, error, "saga finished"),
        }
        self.publish(SagaEvent::SagaFinished {
            saga_id: self.saga_id.to_string(),
            state,
            duration_ms,
        });
    }
}
