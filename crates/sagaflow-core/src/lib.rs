//! Saga orchestration engine for sagaflow.
//!
//! This crate defines the engine and the "port" (`SagaStateStore`) that the
//! infrastructure layer implements. It depends only on `sagaflow-types` --
//! never on `sagaflow-infra` or any database/IO crate.

pub mod event;
pub mod saga;
