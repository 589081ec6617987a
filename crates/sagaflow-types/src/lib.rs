//! Shared domain types for sagaflow.
//!
//! This crate contains the types exchanged between the saga engine, its
//! state-store adapters and callers: saga lifecycle state, options, execution
//! records, persisted snapshots, events and storage errors.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod saga;
