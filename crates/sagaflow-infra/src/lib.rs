//! Infrastructure layer for sagaflow.
//!
//! Contains implementations of the `SagaStateStore` port defined in
//! `sagaflow-core` (SQLite and in-memory) and the TOML options loader.

pub mod config;
pub mod sqlite;
pub mod state;
