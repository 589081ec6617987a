//! SQLite storage layer.
//!
//! Saga snapshot storage backed by a single WAL-mode SQLite connection.

pub mod pool;
pub mod state;

pub use pool::{SagaDatabase, default_data_dir};
pub use state::SqliteStateStore;
