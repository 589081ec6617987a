//! Saga state persistence port.
//!
//! Defines the interface for durable saga snapshots.
//! Implementations live in sagaflow-infra.

use std::future::Future;
use std::sync::Arc;

use sagaflow_types::error::StorageError;
use sagaflow_types::saga::SagaPersistedState;

/// Trait for saga snapshot storage.
///
/// Keyed by saga id. Uses RPITIT (native async fn in traits, Rust 2024
/// edition). The orchestrator never calls two methods concurrently for the
/// same saga id.
pub trait SagaStateStore: Send + Sync {
    /// Insert or overwrite the snapshot for `saga_id`.
    fn save_state(
        &self,
        saga_id: &str,
        state: &SagaPersistedState,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Load a snapshot. Returns None if none is stored.
    fn load_state(
        &self,
        saga_id: &str,
    ) -> impl Future<Output = Result<Option<SagaPersistedState>, StorageError>> + Send;

    /// Delete a snapshot. No-op if none is stored.
    fn delete_state(&self, saga_id: &str) -> impl Future<Output = Result<(), StorageError>> + Send;
}

impl<S: SagaStateStore> SagaStateStore for Arc<S> {
    fn save_state(
        &self,
        saga_id: &str,
        state: &SagaPersistedState,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        (**self).save_state(saga_id, state)
    }

    fn load_state(
        &self,
        saga_id: &str,
    ) -> impl Future<Output = Result<Option<SagaPersistedState>, StorageError>> + Send {
        (**self).load_state(saga_id)
    }

    fn delete_state(&self, saga_id: &str) -> impl Future<Output = Result<(), StorageError>> + Send {
        (**self).delete_state(saga_id)
    }
}

/// Store that keeps nothing. Default for orchestrators without persistence.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStateStore;

impl SagaStateStore for NullStateStore {
    async fn save_state(&self, _saga_id: &str, _state: &SagaPersistedState) -> Result<(), StorageError> {
        Ok(())
    }

    async fn load_state(&self, _saga_id: &str) -> Result<Option<SagaPersistedState>, StorageError> {
        Ok(None)
    }

    async fn delete_state(&self, _saga_id: &str) -> Result<(), StorageError> {
        Ok(())
    }
}
