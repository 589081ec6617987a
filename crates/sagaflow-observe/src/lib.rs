//! Observability setup for sagaflow.
//!
//! The engine itself only emits `tracing` events and spans; this crate
//! installs the subscriber that renders or exports them.

pub mod tracing_setup;

pub use tracing_setup::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};
