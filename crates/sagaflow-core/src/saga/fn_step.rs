//! Closure-backed saga steps.
//!
//! `FnStep` adapts a pair of async closures to [`SagaStep`] so ad-hoc steps
//! can be registered without declaring a type:
//!
//! ```
//! use sagaflow_core::saga::{FnStep, StepResult};
//!
//! #[derive(Default)]
//! struct Order {
//!     reserved: bool,
//! }
//!
//! let step = FnStep::new("reserve", |order: &mut Order| {
//!     Box::pin(async move {
//!         order.reserved = true;
//!         Ok(StepResult::success())
//!     })
//! })
//! .with_compensation(|order: &mut Order| {
//!     Box::pin(async move {
//!         order.reserved = false;
//!         Ok(StepResult::success())
//!     })
//! })
//! .named("Reserve inventory");
//! # let _ = step;
//! ```

use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;

use super::result::{StepOutcome, StepResult};
use super::step::SagaStep;

/// Boxed async action over the saga context.
pub type StepFn<C> = Box<dyn for<'a> Fn(&'a mut C) -> BoxFuture<'a, StepOutcome> + Send + Sync>;

/// Box a closure as a [`StepFn`], e.g. for the compensation argument of
/// [`SagaOrchestrator::add_fn_step`](super::orchestrator::SagaOrchestrator::add_fn_step).
pub fn step_fn<C, F>(action: F) -> StepFn<C>
where
    F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, StepOutcome> + Send + Sync + 'static,
{
    Box::new(action)
}

/// A saga step built from closures.
pub struct FnStep<C> {
    id: String,
    name: Option<String>,
    execute: StepFn<C>,
    compensate: Option<StepFn<C>>,
    requires_compensation: bool,
    max_retries: u32,
    retry_delay: Duration,
}

impl<C: Send + 'static> FnStep<C> {
    /// Create a step with a forward action and no compensation.
    pub fn new<F>(id: impl Into<String>, execute: F) -> Self
    where
        F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, StepOutcome> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: None,
            execute: Box::new(execute),
            compensate: None,
            requires_compensation: true,
            max_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    /// Attach the compensating action.
    pub fn with_compensation<F>(mut self, compensate: F) -> Self
    where
        F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, StepOutcome> + Send + Sync + 'static,
    {
        self.compensate = Some(Box::new(compensate));
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Retry the forward action up to `max_retries` extra times, waiting
    /// `delay` between attempts.
    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    /// Never roll this step back, even when a later step fails.
    pub fn without_compensation(mut self) -> Self {
        self.requires_compensation = false;
        self
    }

    pub(crate) fn from_parts(
        id: String,
        execute: StepFn<C>,
        compensate: Option<StepFn<C>>,
        name: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            execute,
            compensate,
            requires_compensation: true,
            max_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }
}

impl<C: Send> SagaStep<C> for FnStep<C> {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn requires_compensation(&self) -> bool {
        self.requires_compensation
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    fn execute(&self, ctx: &mut C) -> impl Future<Output = StepOutcome> + Send {
        (self.execute)(ctx)
    }

    fn compensate(&self, ctx: &mut C) -> impl Future<Output = StepOutcome> + Send {
        let pending = match &self.compensate {
            Some(compensate) => Some(compensate(ctx)),
            None => None,
        };
        async move {
            match pending {
                Some(fut) => fut.await,
                None => Ok(StepResult::success()),
            }
        }
    }
}
