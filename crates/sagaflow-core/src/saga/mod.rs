//! Saga orchestration: step contract, retries, timeout scopes, compensation
//! and checkpointing.

pub mod checkpoint;
pub mod fn_step;
pub mod orchestrator;
pub mod result;
pub mod retry;
pub mod scope;
pub mod state_store;
pub mod step;
mod telemetry;

pub use checkpoint::{CheckpointError, CheckpointManager};
pub use fn_step::{FnStep, StepFn, step_fn};
pub use orchestrator::SagaOrchestrator;
pub use result::{SagaResult, StepOutcome, StepResult};
pub use retry::RetryPolicy;
pub use scope::{CancelScope, Interruption};
pub use state_store::{NullStateStore, SagaStateStore};
pub use step::{SagaStep, SagaStepDyn};
