//! Saga orchestrator.
//!
//! Runs registered steps in order against one exclusively-owned context,
//! retrying each step per its policy under layered timeout scopes. When a
//! step fails, the steps that completed are compensated in reverse order of
//! completion. The caller always gets a `SagaResult` back: step failures,
//! errors, panics, timeouts and cancellation all become data.
//!
//! State machine:
//!
//! ```text
//! NotStarted -> Running -> Completed
//!                       -> Failed -> Compensating -> CompensationCompleted
//!                                                 -> CompensationFailed
//! ```

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use sagaflow_types::config::SagaOptions;
use sagaflow_types::saga::{SagaState, StepExecutionRecord};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard, TryLockError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::fn_step::{FnStep, StepFn};
use super::result::{SagaResult, StepOutcome, StepResult};
use super::retry::{RetryOutcome, execute_with_retry, guarded};
use super::scope::{CancelScope, Interruption};
use super::state_store::{NullStateStore, SagaStateStore};
use super::step::{SagaStep, SagaStepDyn};
use super::telemetry::Telemetry;
use crate::event::SagaEventBus;

// ---------------------------------------------------------------------------
// SagaOrchestrator
// ---------------------------------------------------------------------------

/// Ordered list of saga steps plus the options and ports they run with.
///
/// One orchestrator may execute many times, including concurrently with
/// distinct contexts: each `execute` call owns its own compensation stack
/// and records. Unless an id is pinned with
/// [`with_saga_id`](Self::with_saga_id), every execution mints its own
/// time-ordered saga id, so persisted snapshots never collide.
///
/// A pinned id names a single snapshot slot. With state persistence on,
/// only one execution may hold it at a time; an overlapping `execute` is
/// refused and reported as `Failed` without running any step or touching
/// the store.
pub struct SagaOrchestrator<C: Send, S = NullStateStore> {
    saga_id: Option<String>,
    options: SagaOptions,
    steps: Vec<Box<dyn SagaStepDyn<C>>>,
    store: S,
    events: Option<SagaEventBus>,
    pinned_slot: Mutex<()>,
}

impl<C: Send + 'static> SagaOrchestrator<C, NullStateStore> {
    /// Create an orchestrator with no state store. Each execution gets a
    /// fresh saga id.
    pub fn new(options: SagaOptions) -> Self {
        Self {
            saga_id: None,
            options,
            steps: Vec::new(),
            store: NullStateStore,
            events: None,
            pinned_slot: Mutex::new(()),
        }
    }
}

impl<C: Send + 'static, S: SagaStateStore> SagaOrchestrator<C, S> {
    /// Use `saga_id` for every execution instead of minting one per call.
    pub fn with_saga_id(mut self, saga_id: impl Into<String>) -> Self {
        self.saga_id = Some(saga_id.into());
        self
    }

    /// Attach the store snapshots are written to. The store is only used
    /// when `enable_state_persistence` is set.
    pub fn with_state_store<T: SagaStateStore>(self, store: T) -> SagaOrchestrator<C, T> {
        SagaOrchestrator {
            saga_id: self.saga_id,
            options: self.options,
            steps: self.steps,
            store,
            events: self.events,
            pinned_slot: self.pinned_slot,
        }
    }

    pub fn with_event_bus(mut self, events: SagaEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// The pinned saga id, if any.
    pub fn saga_id(&self) -> Option<&str> {
        self.saga_id.as_deref()
    }

    pub fn options(&self) -> &SagaOptions {
        &self.options
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Append a step. Registration order is execution order. Step ids are
    /// not checked for uniqueness.
    pub fn add_step<T: SagaStep<C> + 'static>(&mut self, step: T) -> &mut Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Append a step built from closures.
    pub fn add_fn_step<F>(
        &mut self,
        id: impl Into<String>,
        execute: F,
        compensate: Option<StepFn<C>>,
        name: Option<&str>,
    ) -> &mut Self
    where
        F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, StepOutcome> + Send + Sync + 'static,
    {
        let step = FnStep::from_parts(id.into(), Box::new(execute), compensate, name.map(str::to_string));
        self.add_step(step)
    }

    /// Chaining variant of [`add_step`](Self::add_step).
    pub fn step<T: SagaStep<C> + 'static>(mut self, step: T) -> Self {
        self.add_step(step);
        self
    }

    /// Run the saga with a token that is never cancelled.
    pub async fn run(&self, context: C) -> SagaResult<C>
    where
        C: Serialize,
    {
        self.execute(context, &CancellationToken::new()).await
    }

    /// Run every step against `context`, compensating on failure.
    ///
    /// `cancel` is the caller's ambient token. Cancelling it, or hitting the
    /// saga or step timeout, aborts the step in flight without retrying and
    /// without compensation. This method never fails: every outcome is
    /// reported in the returned `SagaResult`, which also hands the context
    /// back.
    ///
    /// With state persistence on, every store call is bounded by the same
    /// token and saga timeout. A snapshot write that *fails* after step `s`
    /// makes `s` the failed step and triggers compensation; a write that is
    /// *interrupted* by cancellation or timeout leaves `failed_step_id`
    /// empty, because no step failed, and compensates nothing.
    pub async fn execute(&self, context: C, cancel: &CancellationToken) -> SagaResult<C>
    where
        C: Serialize,
    {
        let saga_id = self
            .saga_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let span = info_span!("saga", saga_id = %saga_id, steps = self.steps.len());
        self.drive(context, &saga_id, cancel).instrument(span).await
    }

    /// Hold the pinned id for one persisted execution. `Ok(None)` when no
    /// exclusivity is needed.
    fn claim_pinned_slot(&self) -> Result<Option<MutexGuard<'_, ()>>, TryLockError> {
        if !self.options.enable_state_persistence || self.saga_id.is_none() {
            return Ok(None);
        }
        self.pinned_slot.try_lock().map(Some)
    }

    async fn drive(&self, context: C, saga_id: &str, cancel: &CancellationToken) -> SagaResult<C>
    where
        C: Serialize,
    {
        let clock = Instant::now();
        let telemetry = Telemetry::new(saga_id, self.events.as_ref());
        let scope = CancelScope::saga(cancel.clone(), self.options.saga_timeout);
        let claim = self.claim_pinned_slot();
        let checkpoints = (self.options.enable_state_persistence && claim.is_ok())
            .then(|| CheckpointManager::new(&self.store, saga_id));
        let mut run = Run::new(saga_id, context, checkpoints);

        run.transition(SagaState::Running);
        telemetry.saga_started(self.steps.len());

        if claim.is_err() {
            tracing::warn!(saga_id, "refusing overlapping execution of a persisted saga");
            run.fail(None, format!("saga '{saga_id}' is already executing"));
        } else if self.checkpoint_start(&mut run, &scope).await {
            self.run_forward(&mut run, &scope, &telemetry).await;
        }

        if run.state == SagaState::Running {
            run.transition(SagaState::Completed);
        } else if self.should_compensate(&run) {
            self.compensate(&mut run, &scope, &telemetry).await;
        }

        self.checkpoint_outcome(&run, &scope).await;

        let total_duration = clock.elapsed();
        telemetry.saga_finished(run.state, millis(total_duration), run.error_message.as_deref());
        run.into_result(total_duration)
    }

    fn should_compensate(&self, run: &Run<'_, C, S>) -> bool {
        run.state == SagaState::Failed
            && !run.interrupted
            && self.options.auto_compensate_on_failure
            && !run.stack.is_empty()
    }

    // -----------------------------------------------------------------------
    // Forward phase
    // -----------------------------------------------------------------------

    /// Returns false when the saga must stop before its first step.
    async fn checkpoint_start(&self, run: &mut Run<'_, C, S>, scope: &CancelScope) -> bool
    where
        C: Serialize,
    {
        let Some(checkpoints) = run.checkpoints.as_ref() else {
            return true;
        };

        let outcome = scope.run(checkpoints.checkpoint_started(&run.context)).await;
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                run.fail(None, format!("failed to persist initial saga state: {err}"));
                false
            }
            Err(interruption) => {
                run.interrupt(None, interruption.to_string());
                false
            }
        }
    }

    async fn run_forward(&self, run: &mut Run<'_, C, S>, scope: &CancelScope, telemetry: &Telemetry<'_>)
    where
        C: Serialize,
    {
        let last = self.steps.len().saturating_sub(1);

        for (index, step) in self.steps.iter().enumerate() {
            let step = step.as_ref();
            let step_scope = scope.step(self.options.step_timeout);
            let timing = Timing::start();

            let report = execute_with_retry(step, &mut run.context, &step_scope, telemetry).await;
            let retry_count = report.retry_count();

            let result = match report.outcome {
                RetryOutcome::Finished(result) => result,
                RetryOutcome::Interrupted(interruption) => {
                    let message = format!("step '{}' interrupted: {interruption}", step.id());
                    telemetry.step_attempt_failed(step.id(), report.attempts, &message, false);
                    run.step_results
                        .push(timing.record(step, false, Err(message.clone()), retry_count));
                    run.interrupt(Some(step.id()), message);
                    return;
                }
            };

            if !result.is_success() {
                let message = result.describe_failure();
                run.step_results
                    .push(timing.record(step, false, Err(message.clone()), retry_count));
                run.fail(Some(step.id()), message);
                return;
            }

            let skip_compensation = result.skip_compensation();
            let record = timing.record(step, false, Ok(result.into_data()), retry_count);
            telemetry.step_succeeded(step.id(), record.duration_ms, retry_count);
            run.step_results.push(record);

            if step.requires_compensation() && !skip_compensation {
                run.stack.push(index);
            }

            if let Some(checkpoints) = run.checkpoints.as_mut() {
                let outcome = scope
                    .run(checkpoints.checkpoint_step_completed(step.id(), index + 1, &run.context))
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        run.fail(
                            Some(step.id()),
                            format!("failed to persist saga state after step '{}': {err}", step.id()),
                        );
                        return;
                    }
                    Err(interruption) => {
                        run.interrupt(None, interruption.to_string());
                        return;
                    }
                }
            }

            if index < last {
                if let Some(delay) = self.options.step_delay {
                    if let Err(interruption) = scope.sleep(delay).await {
                        run.interrupt(None, interruption.to_string());
                        return;
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Compensation phase
    // -----------------------------------------------------------------------

    async fn compensate(&self, run: &mut Run<'_, C, S>, scope: &CancelScope, telemetry: &Telemetry<'_>)
    where
        C: Serialize,
    {
        run.transition(SagaState::Compensating);
        telemetry.compensation_phase_started(run.stack.len());

        let mut all_succeeded = true;

        while let Some(index) = run.stack.pop() {
            let step = self.steps[index].as_ref();
            let compensation_scope = scope.compensation(self.options.compensation_timeout);
            telemetry.compensation_started(step.id());
            let timing = Timing::start();

            let outcome = compensation_scope
                .run(guarded(step.compensate_boxed(&mut run.context)))
                .await;
            let result = outcome.unwrap_or_else(|interruption| StepResult::from_error(interruption.into()));

            if result.is_success() {
                let record = timing.record(step, true, Ok(result.into_data()), 0);
                telemetry.compensation_succeeded(step.id(), record.duration_ms);
                run.compensation_results.push(record);

                if let Some(checkpoints) = run.checkpoints.as_mut() {
                    let outcome = scope
                        .run(checkpoints.checkpoint_step_compensated(step.id(), &run.context))
                        .await;
                    if let Err(error) = persisted(outcome) {
                        tracing::warn!(
                            saga_id = run.saga_id,
                            step_id = step.id(),
                            %error,
                            "failed to persist compensation progress"
                        );
                    }
                }
                continue;
            }

            all_succeeded = false;
            let message = result.describe_failure();
            telemetry.compensation_failed(step.id(), &message);
            run.compensation_results
                .push(timing.record(step, true, Err(message), 0));

            if !self.options.continue_compensation_on_error {
                break;
            }
        }

        telemetry.compensation_phase_finished(all_succeeded);
        run.transition(if all_succeeded {
            SagaState::CompensationCompleted
        } else {
            SagaState::CompensationFailed
        });
    }

    // -----------------------------------------------------------------------
    // Terminal persistence
    // -----------------------------------------------------------------------

    /// Delete the snapshot of a completed saga, or record the terminal state
    /// of a failed one. Runs under the saga scope: once the saga was
    /// cancelled or timed out, the last snapshot written is left as is.
    async fn checkpoint_outcome(&self, run: &Run<'_, C, S>, scope: &CancelScope)
    where
        C: Serialize,
    {
        let Some(checkpoints) = run.checkpoints.as_ref() else {
            return;
        };

        if run.state == SagaState::Completed {
            if let Err(error) = persisted(scope.run(checkpoints.clear()).await) {
                tracing::warn!(saga_id = run.saga_id, %error, "failed to delete saga snapshot");
            }
        } else if let Err(error) =
            persisted(scope.run(checkpoints.checkpoint_terminal(run.state, &run.context)).await)
        {
            tracing::warn!(
                saga_id = run.saga_id,
                state = %run.state,
                %error,
                "failed to persist terminal saga state"
            );
        }
    }
}

/// Flatten a scoped store call into one displayable error.
fn persisted(outcome: Result<Result<(), CheckpointError>, Interruption>) -> Result<(), String> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(interruption) => Err(interruption.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Per-execution state
// ---------------------------------------------------------------------------

/// Mutable state of one `execute` call.
struct Run<'s, C, S: SagaStateStore> {
    saga_id: &'s str,
    state: SagaState,
    context: C,
    step_results: Vec<StepExecutionRecord>,
    compensation_results: Vec<StepExecutionRecord>,
    /// Indices of completed, compensatable steps. Top is the most recent.
    stack: Vec<usize>,
    failed_step_id: Option<String>,
    error_message: Option<String>,
    /// Set when a scope fired; interrupted sagas are never compensated.
    interrupted: bool,
    checkpoints: Option<CheckpointManager<'s, S>>,
}

impl<'s, C, S: SagaStateStore> Run<'s, C, S> {
    fn new(saga_id: &'s str, context: C, checkpoints: Option<CheckpointManager<'s, S>>) -> Self {
        Self {
            saga_id,
            state: SagaState::NotStarted,
            context,
            step_results: Vec::new(),
            compensation_results: Vec::new(),
            stack: Vec::new(),
            failed_step_id: None,
            error_message: None,
            interrupted: false,
            checkpoints,
        }
    }

    fn transition(&mut self, next: SagaState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "unexpected saga state transition");
            debug_assert!(false, "invalid saga transition {} -> {}", self.state, next);
        }
        tracing::debug!(from = %self.state, to = %next, "saga state transition");
        self.state = next;
    }

    fn fail(&mut self, step_id: Option<&str>, message: String) {
        self.failed_step_id = step_id.map(str::to_string);
        self.error_message = Some(message);
        self.transition(SagaState::Failed);
    }

    fn interrupt(&mut self, step_id: Option<&str>, message: String) {
        self.interrupted = true;
        self.fail(step_id, message);
    }

    fn into_result(self, total_duration: std::time::Duration) -> SagaResult<C> {
        SagaResult {
            saga_id: self.saga_id.to_string(),
            is_success: self.state == SagaState::Completed,
            context: self.context,
            step_results: self.step_results,
            compensation_results: self.compensation_results,
            failed_step_id: self.failed_step_id,
            error_message: self.error_message,
            total_duration,
            state: self.state,
        }
    }
}

/// Wall-clock start plus monotonic clock for one step or compensation call.
struct Timing {
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl Timing {
    fn start() -> Self {
        Self {
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    /// Build the execution record. `outcome` is the output on success or the
    /// error message on failure.
    fn record<C: Send>(
        &self,
        step: &dyn SagaStepDyn<C>,
        is_compensation: bool,
        outcome: Result<Option<Value>, String>,
        retry_count: u32,
    ) -> StepExecutionRecord {
        let (is_success, output, error_message) = match outcome {
            Ok(output) => (true, output, None),
            Err(message) => (false, None, Some(message)),
        };
        StepExecutionRecord {
            step_id: step.id().to_string(),
            step_name: step.name().map(str::to_string),
            is_success,
            error_message,
            started_at: self.started_at,
            completed_at: Utc::now(),
            duration_ms: millis(self.clock.elapsed()),
            retry_count,
            is_compensation,
            output,
        }
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
