//! The saga step contract.
//!
//! `SagaStep` uses RPITIT (native async fn in traits), so it cannot be used
//! as a trait object directly. The orchestrator stores steps as
//! `Box<dyn SagaStepDyn<C>>`, an object-safe mirror with boxed futures that
//! every `SagaStep` implements through a blanket impl.

use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;

use super::result::{StepOutcome, StepResult};

/// A unit of work in a saga: a forward action plus an optional compensating
/// action, with retry parameters.
///
/// Implement this trait directly for steps that carry their own state or
/// dependencies; for ad-hoc steps built from closures use
/// [`FnStep`](super::fn_step::FnStep).
///
/// Steps never hold a reference to the context. They receive it as
/// `&mut C` for the duration of one call and communicate with later steps
/// only by mutating it.
pub trait SagaStep<C: Send>: Send + Sync {
    /// Identity used in records, the compensation stack and snapshots.
    /// Must be unique within a saga; this is not validated.
    fn id(&self) -> &str;

    /// Human-readable label for diagnostics.
    fn name(&self) -> Option<&str> {
        None
    }

    /// When false, a successful run of this step is never rolled back.
    fn requires_compensation(&self) -> bool {
        true
    }

    /// Extra forward attempts after the first one fails.
    fn max_retries(&self) -> u32 {
        0
    }

    /// Fixed pause between forward attempts.
    fn retry_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// Run the forward action.
    fn execute(&self, ctx: &mut C) -> impl Future<Output = StepOutcome> + Send;

    /// Undo the forward action. The default is a no-op success, suitable for
    /// steps with nothing to roll back.
    fn compensate(&self, ctx: &mut C) -> impl Future<Output = StepOutcome> + Send {
        let _ = ctx;
        async { Ok(StepResult::success()) }
    }
}

/// Object-safe version of [`SagaStep`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch. A blanket
/// implementation is provided for all types implementing `SagaStep`.
pub trait SagaStepDyn<C: Send>: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> Option<&str>;

    fn requires_compensation(&self) -> bool;

    fn max_retries(&self) -> u32;

    fn retry_delay(&self) -> Duration;

    fn execute_boxed<'a>(&'a self, ctx: &'a mut C) -> BoxFuture<'a, StepOutcome>;

    fn compensate_boxed<'a>(&'a self, ctx: &'a mut C) -> BoxFuture<'a, StepOutcome>;
}

/// Blanket implementation: any `SagaStep` automatically implements `SagaStepDyn`.
impl<C: Send, T: SagaStep<C>> SagaStepDyn<C> for T {
    fn id(&self) -> &str {
        <T as SagaStep<C>>::id(self)
    }

    fn name(&self) -> Option<&str> {
        <T as SagaStep<C>>::name(self)
    }

    fn requires_compensation(&self) -> bool {
        <T as SagaStep<C>>::requires_compensation(self)
    }

    fn max_retries(&self) -> u32 {
        <T as SagaStep<C>>::max_retries(self)
    }

    fn retry_delay(&self) -> Duration {
        <T as SagaStep<C>>::retry_delay(self)
    }

    fn execute_boxed<'a>(&'a self, ctx: &'a mut C) -> BoxFuture<'a, StepOutcome> {
        Box::pin(<T as SagaStep<C>>::execute(self, ctx))
    }

    fn compensate_boxed<'a>(&'a self, ctx: &'a mut C) -> BoxFuture<'a, StepOutcome> {
        Box::pin(<T as SagaStep<C>>::compensate(self, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Ledger {
        entries: Vec<String>,
    }

    struct ReadOnly;

    impl SagaStep<Ledger> for ReadOnly {
        fn id(&self) -> &str {
            "read_only"
        }

        async fn execute(&self, ctx: &mut Ledger) -> StepOutcome {
            ctx.entries.push("read".to_string());
            Ok(StepResult::success())
        }
    }

    struct Debit {
        amount: u32,
    }

    impl SagaStep<Ledger> for Debit {
        fn id(&self) -> &str {
            "debit"
        }

        fn name(&self) -> Option<&str> {
            Some("Debit account")
        }

        fn max_retries(&self) -> u32 {
            2
        }

        fn retry_delay(&self) -> Duration {
            Duration::from_millis(5)
        }

        async fn execute(&self, ctx: &mut Ledger) -> StepOutcome {
            ctx.entries.push(format!("debit {}", self.amount));
            Ok(StepResult::success())
        }

        async fn compensate(&self, ctx: &mut Ledger) -> StepOutcome {
            ctx.entries.push(format!("credit {}", self.amount));
            Ok(StepResult::success())
        }
    }

    #[tokio::test]
    async fn default_compensation_is_noop_success() {
        let step: Box<dyn SagaStepDyn<Ledger>> = Box::new(ReadOnly);
        let mut ledger = Ledger::default();

        let outcome = step.compensate_boxed(&mut ledger).await.unwrap();

        assert!(outcome.is_success());
        assert!(ledger.entries.is_empty());
        assert!(step.requires_compensation());
        assert_eq!(step.max_retries(), 0);
        assert_eq!(step.retry_delay(), Duration::ZERO);
        assert!(step.name().is_none());
    }

    #[tokio::test]
    async fn dyn_dispatch_forwards_to_step() {
        let step: Box<dyn SagaStepDyn<Ledger>> = Box::new(Debit { amount: 40 });
        let mut ledger = Ledger::default();

        step.execute_boxed(&mut ledger).await.unwrap();
        step.compensate_boxed(&mut ledger).await.unwrap();

        assert_eq!(ledger.entries, vec!["debit 40", "credit 40"]);
        assert_eq!(step.id(), "debit");
        assert_eq!(step.name(), Some("Debit account"));
        assert_eq!(step.max_retries(), 2);
        assert_eq!(step.retry_delay(), Duration::from_millis(5));
    }
}
