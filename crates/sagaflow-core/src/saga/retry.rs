//! Retry wrapper for forward step execution.
//!
//! Saga steps retry with a constant delay: up to `max_retries + 1` attempts,
//! sleeping exactly `retry_delay` between attempts (never after the last).
//! There is deliberately no backoff growth.
//!
//! Returned failures, errors and panics all count as failed attempts. A
//! fired scope (caller cancellation or a timeout) ends the loop at once and
//! is never retried.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use super::result::{StepOutcome, StepResult};
use super::scope::{CancelScope, Interruption};
use super::step::SagaStepDyn;
use super::telemetry::Telemetry;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Fixed-delay retry bound for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt follows a failed one.
    ///
    /// `attempt` is 1-based (first execution is attempt 1).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }
}

// ---------------------------------------------------------------------------
// Attempt execution
// ---------------------------------------------------------------------------

/// How the retry loop ended.
#[derive(Debug)]
pub(crate) enum RetryOutcome {
    /// The step produced a result: the first success, or the last failure
    /// once attempts were exhausted.
    Finished(StepResult),
    /// The scope fired while an attempt or a retry delay was in flight.
    Interrupted(Interruption),
}

#[derive(Debug)]
pub(crate) struct RetryReport {
    pub outcome: RetryOutcome,
    pub attempts: u32,
}

impl RetryReport {
    pub(crate) fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Await a step future, turning errors and panics into failing results.
pub(crate) async fn guarded(fut: BoxFuture<'_, StepOutcome>) -> StepResult {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => StepResult::from_error(err),
        Err(panic) => StepResult::from_error(anyhow::anyhow!("step panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run a step's forward action under `scope`, retrying per its policy.
pub(crate) async fn execute_with_retry<C: Send>(
    step: &dyn SagaStepDyn<C>,
    ctx: &mut C,
    scope: &CancelScope,
    telemetry: &Telemetry<'_>,
) -> RetryReport {
    let policy = RetryPolicy::new(step.max_retries(), step.retry_delay());
    let mut attempt = 0;

    loop {
        attempt += 1;
        telemetry.step_attempt_started(step.id(), attempt);

        let result = match scope.run(guarded(step.execute_boxed(ctx))).await {
            Ok(result) => result,
            Err(interruption) => {
                return RetryReport {
                    outcome: RetryOutcome::Interrupted(interruption),
                    attempts: attempt,
                };
            }
        };

        if result.is_success() {
            return RetryReport {
                outcome: RetryOutcome::Finished(result),
                attempts: attempt,
            };
        }

        let will_retry = policy.should_retry(attempt);
        telemetry.step_attempt_failed(step.id(), attempt, &result.describe_failure(), will_retry);

        if !will_retry {
            return RetryReport {
                outcome: RetryOutcome::Finished(result),
                attempts: attempt,
            };
        }

        if let Err(interruption) = scope.sleep(policy.delay).await {
            return RetryReport {
                outcome: RetryOutcome::Interrupted(interruption),
                attempts: attempt,
            };
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::fn_step::FnStep;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Attempts {
        count: u32,
    }

    fn fails_until(success_on: u32, max_retries: u32) -> FnStep<Attempts> {
        FnStep::new("flaky", move |ctx: &mut Attempts| {
            Box::pin(async move {
                ctx.count += 1;
                if ctx.count >= success_on {
                    Ok(StepResult::success())
                } else {
                    Ok(StepResult::failure(format!("attempt {} failed", ctx.count)))
                }
            })
        })
        .with_retries(max_retries, Duration::from_millis(1))
    }

    fn root_scope() -> CancelScope {
        CancelScope::new(CancellationToken::new())
    }

    #[test]
    fn test_should_retry_within_limit() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_zero_retries_means_single_attempt() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert!(!policy.should_retry(1));
    }

    #[tokio::test]
    async fn test_succeeds_after_retries() {
        let step = fails_until(3, 5);
        let mut ctx = Attempts::default();
        let telemetry = Telemetry::new("s-1", None);

        let report = execute_with_retry(&step, &mut ctx, &root_scope(), &telemetry).await;

        assert!(matches!(report.outcome, RetryOutcome::Finished(ref r) if r.is_success()));
        assert_eq!(report.attempts, 3);
        assert_eq!(report.retry_count(), 2);
        assert_eq!(ctx.count, 3);
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_failure() {
        let step = fails_until(u32::MAX, 2);
        let mut ctx = Attempts::default();
        let telemetry = Telemetry::new("s-1", None);

        let report = execute_with_retry(&step, &mut ctx, &root_scope(), &telemetry).await;

        match report.outcome {
            RetryOutcome::Finished(result) => {
                assert!(!result.is_success());
                assert_eq!(result.error_message(), Some("attempt 3 failed"));
            }
            RetryOutcome::Interrupted(i) => panic!("unexpected interruption: {i}"),
        }
        assert_eq!(ctx.count, 3);
    }

    #[tokio::test]
    async fn test_constant_delay_between_attempts() {
        let step = FnStep::new("always_fails", |ctx: &mut Attempts| {
            Box::pin(async move {
                ctx.count += 1;
                Err(anyhow::anyhow!("boom"))
            })
        })
        .with_retries(2, Duration::from_millis(10));
        let mut ctx = Attempts::default();
        let telemetry = Telemetry::new("s-1", None);

        let start = Instant::now();
        let report = execute_with_retry(&step, &mut ctx, &root_scope(), &telemetry).await;

        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(report.attempts, 3);
        match report.outcome {
            RetryOutcome::Finished(result) => {
                assert_eq!(result.error_message(), Some("boom"));
                assert!(result.error().is_some());
            }
            RetryOutcome::Interrupted(i) => panic!("unexpected interruption: {i}"),
        }
    }

    fn explode() -> StepOutcome {
        panic!("inventory service exploded")
    }

    #[tokio::test]
    async fn test_panic_is_captured_as_failure() {
        let step = FnStep::new("panics", |_ctx: &mut Attempts| Box::pin(async move { explode() }));
        let mut ctx = Attempts::default();
        let telemetry = Telemetry::new("s-1", None);

        let report = execute_with_retry(&step, &mut ctx, &root_scope(), &telemetry).await;

        match report.outcome {
            RetryOutcome::Finished(result) => {
                let message = result.error_message().unwrap();
                assert!(message.contains("inventory service exploded"), "{message}");
            }
            RetryOutcome::Interrupted(i) => panic!("unexpected interruption: {i}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_is_not_retried() {
        let token = CancellationToken::new();
        let scope = CancelScope::new(token.clone());
        let step = FnStep::new("hangs", move |ctx: &mut Attempts| {
            let token = token.clone();
            Box::pin(async move {
                ctx.count += 1;
                token.cancel();
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(StepResult::success())
            })
        })
        .with_retries(5, Duration::ZERO);
        let mut ctx = Attempts::default();
        let telemetry = Telemetry::new("s-1", None);

        let report = execute_with_retry(&step, &mut ctx, &scope, &telemetry).await;

        assert!(matches!(report.outcome, RetryOutcome::Interrupted(Interruption::Cancelled)));
        assert_eq!(report.attempts, 1);
        assert_eq!(ctx.count, 1);
    }
}
