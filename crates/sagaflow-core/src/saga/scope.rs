//! Layered cancellation scopes.
//!
//! A saga runs under three independent timeout scopes (whole saga, each
//! forward step, each compensation call), all layered on the caller's
//! ambient `CancellationToken`. A `CancelScope` carries the ambient token plus
//! the deadlines of every scope it is nested in. Child scopes are fresh for
//! every step or compensation call, so a fired step deadline never affects a
//! sibling.
//!
//! When several scopes have fired, the ambient token wins; among deadlines
//! the earliest one is reported.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why an operation was cut short by its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interruption {
    /// The caller's token fired.
    #[error("saga was cancelled by the caller")]
    Cancelled,

    #[error("saga timed out after {0:?}")]
    SagaTimeout(Duration),

    #[error("step timed out after {0:?}")]
    StepTimeout(Duration),

    #[error("compensation timed out after {0:?}")]
    CompensationTimeout(Duration),
}

impl Interruption {
    /// True when the caller cancelled, as opposed to an internal timeout.
    pub fn is_ambient(self) -> bool {
        matches!(self, Interruption::Cancelled)
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    reason: Interruption,
}

/// Cancellation scope: the ambient token plus zero or more deadlines.
#[derive(Debug, Clone)]
pub struct CancelScope {
    ambient: CancellationToken,
    deadlines: Vec<Deadline>,
}

impl CancelScope {
    /// Root scope bound only by the caller's token.
    pub fn new(ambient: CancellationToken) -> Self {
        Self {
            ambient,
            deadlines: Vec::new(),
        }
    }

    /// Scope for the whole saga.
    pub fn saga(ambient: CancellationToken, timeout: Option<Duration>) -> Self {
        Self::new(ambient).nested(timeout, Interruption::SagaTimeout)
    }

    /// Fresh child scope for one forward step.
    pub fn step(&self, timeout: Option<Duration>) -> Self {
        self.nested(timeout, Interruption::StepTimeout)
    }

    /// Fresh child scope for one compensation call.
    pub fn compensation(&self, timeout: Option<Duration>) -> Self {
        self.nested(timeout, Interruption::CompensationTimeout)
    }

    fn nested(&self, timeout: Option<Duration>, reason: fn(Duration) -> Interruption) -> Self {
        let mut deadlines = self.deadlines.clone();
        if let Some(timeout) = timeout {
            deadlines.push(Deadline {
                at: Instant::now() + timeout,
                reason: reason(timeout),
            });
        }
        Self {
            ambient: self.ambient.clone(),
            deadlines,
        }
    }

    /// Whether the scope has already fired, and why.
    pub fn interruption(&self) -> Option<Interruption> {
        if self.ambient.is_cancelled() {
            return Some(Interruption::Cancelled);
        }
        let now = Instant::now();
        self.earliest()
            .filter(|deadline| deadline.at <= now)
            .map(|deadline| deadline.reason)
    }

    fn earliest(&self) -> Option<Deadline> {
        self.deadlines.iter().copied().min_by_key(|deadline| deadline.at)
    }

    /// Drive `fut` to completion unless the scope fires first. When it
    /// fires, `fut` is dropped.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interruption> {
        if let Some(reason) = self.interruption() {
            return Err(reason);
        }

        let expiry = self.earliest();
        let expired = async {
            match expiry {
                Some(deadline) => {
                    tokio::time::sleep_until(deadline.at).await;
                    deadline.reason
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.ambient.cancelled() => Err(Interruption::Cancelled),
            reason = expired => Err(reason),
            output = fut => Ok(output),
        }
    }

    /// Cancellable sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interruption> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_returns_output_when_nothing_fires() {
        let scope = CancelScope::saga(CancellationToken::new(), Some(Duration::from_secs(5)));
        let out = scope.run(async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn ambient_cancellation_is_reported() {
        let token = CancellationToken::new();
        let scope = CancelScope::new(token.clone());
        token.cancel();

        let out = scope.run(async { 1 }).await;
        assert_eq!(out, Err(Interruption::Cancelled));
        assert!(Interruption::Cancelled.is_ambient());
    }

    #[tokio::test]
    async fn ambient_cancellation_interrupts_in_flight_future() {
        let token = CancellationToken::new();
        let scope = CancelScope::new(token.clone());
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let out = scope.run(tokio::time::sleep(Duration::from_secs(30))).await;
        assert_eq!(out, Err(Interruption::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn step_deadline_fires() {
        let saga = CancelScope::saga(CancellationToken::new(), None);
        let step = saga.step(Some(Duration::from_millis(50)));

        let out = step.run(tokio::time::sleep(Duration::from_secs(10))).await;
        assert_eq!(out, Err(Interruption::StepTimeout(Duration::from_millis(50))));
        assert!(!Interruption::StepTimeout(Duration::ZERO).is_ambient());
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_deadline_wins() {
        let saga = CancelScope::saga(CancellationToken::new(), Some(Duration::from_millis(20)));
        let step = saga.step(Some(Duration::from_secs(60)));

        let out = step.run(tokio::time::sleep(Duration::from_secs(120))).await;
        assert_eq!(out, Err(Interruption::SagaTimeout(Duration::from_millis(20))));
    }

    #[tokio::test(start_paused = true)]
    async fn sibling_scopes_are_independent() {
        let saga = CancelScope::saga(CancellationToken::new(), None);

        let first = saga.compensation(Some(Duration::from_millis(10)));
        let out = first.sleep(Duration::from_secs(1)).await;
        assert!(matches!(out, Err(Interruption::CompensationTimeout(_))));

        let second = saga.compensation(Some(Duration::from_millis(10)));
        assert_eq!(second.run(async { "ok" }).await, Ok("ok"));
        assert!(saga.interruption().is_none());
    }

    #[tokio::test]
    async fn ambient_beats_expired_deadline() {
        let token = CancellationToken::new();
        let scope = CancelScope::saga(token.clone(), Some(Duration::ZERO));
        token.cancel();

        assert_eq!(scope.interruption(), Some(Interruption::Cancelled));
    }
}
