//! In-memory saga state store.
//!
//! `DashMap`-backed implementation of `SagaStateStore` for tests, embedded
//! use and processes that only need snapshots for their own lifetime.

use std::sync::Arc;

use dashmap::DashMap;
use sagaflow_core::saga::SagaStateStore;
use sagaflow_types::error::StorageError;
use sagaflow_types::saga::SagaPersistedState;

// ---------------------------------------------------------------------------
// InMemoryStateStore
// ---------------------------------------------------------------------------

/// Thread-safe snapshot map keyed by saga id.
///
/// Cloning shares the underlying map, so a clone handed to an orchestrator
/// can be inspected afterwards through the original.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    states: Arc<DashMap<String, SagaPersistedState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Copy of the snapshot for `saga_id`, if any.
    pub fn snapshot(&self, saga_id: &str) -> Option<SagaPersistedState> {
        self.states.get(saga_id).map(|r| r.value().clone())
    }

    /// All stored saga ids.
    pub fn saga_ids(&self) -> Vec<String> {
        self.states.iter().map(|r| r.key().clone()).collect()
    }
}

impl SagaStateStore for InMemoryStateStore {
    async fn save_state(&self, saga_id: &str, state: &SagaPersistedState) -> Result<(), StorageError> {
        self.states.insert(saga_id.to_string(), state.clone());
        tracing::trace!(saga_id, state = %state.state, "stored saga snapshot in memory");
        Ok(())
    }

    async fn load_state(&self, saga_id: &str) -> Result<Option<SagaPersistedState>, StorageError> {
        Ok(self.snapshot(saga_id))
    }

    async fn delete_state(&self, saga_id: &str) -> Result<(), StorageError> {
        self.states.remove(saga_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
