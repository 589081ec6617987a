//! Durable checkpoint manager for saga execution state.
//!
//! Wraps a `SagaStateStore` to build and write `SagaPersistedState`
//! snapshots at each saga transition. The manager tracks which steps have
//! completed and which have been compensated, so every snapshot it writes
//! is self-contained.

use chrono::{DateTime, Utc};
use sagaflow_types::saga::{SagaPersistedState, SagaState};
use serde::Serialize;

use super::state_store::SagaStateStore;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Writes snapshots for one saga execution.
pub struct CheckpointManager<'s, S: SagaStateStore> {
    store: &'s S,
    saga_id: String,
    created_at: DateTime<Utc>,
    current_step_index: usize,
    completed_steps: Vec<String>,
    compensated_steps: Vec<String>,
}

impl<'s, S: SagaStateStore> CheckpointManager<'s, S> {
    pub fn new(store: &'s S, saga_id: impl Into<String>) -> Self {
        Self {
            store,
            saga_id: saga_id.into(),
            created_at: Utc::now(),
            current_step_index: 0,
            completed_steps: Vec::new(),
            compensated_steps: Vec::new(),
        }
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    pub fn compensated_steps(&self) -> &[String] {
        &self.compensated_steps
    }

    /// Initial `Running` snapshot, written before the first step.
    pub async fn checkpoint_started<C: Serialize>(&self, context: &C) -> Result<(), CheckpointError> {
        self.write(SagaState::Running, context).await?;
        tracing::debug!(saga_id = %self.saga_id, "checkpointed saga start");
        Ok(())
    }

    /// Record a successful forward step. `next_index` is the index of the
    /// step that runs next.
    pub async fn checkpoint_step_completed<C: Serialize>(
        &mut self,
        step_id: &str,
        next_index: usize,
        context: &C,
    ) -> Result<(), CheckpointError> {
        self.completed_steps.push(step_id.to_string());
        self.current_step_index = next_index;
        self.write(SagaState::Running, context).await?;
        tracing::debug!(saga_id = %self.saga_id, step_id, next_index, "checkpointed step completion");
        Ok(())
    }

    /// Record a successful compensation.
    pub async fn checkpoint_step_compensated<C: Serialize>(
        &mut self,
        step_id: &str,
        context: &C,
    ) -> Result<(), CheckpointError> {
        self.compensated_steps.push(step_id.to_string());
        self.write(SagaState::Compensating, context).await?;
        tracing::debug!(saga_id = %self.saga_id, step_id, "checkpointed step compensation");
        Ok(())
    }

    /// Final snapshot for a saga that did not complete.
    pub async fn checkpoint_terminal<C: Serialize>(
        &self,
        state: SagaState,
        context: &C,
    ) -> Result<(), CheckpointError> {
        self.write(state, context).await?;
        tracing::debug!(saga_id = %self.saga_id, state = %state, "checkpointed terminal state");
        Ok(())
    }

    /// Remove the snapshot once the saga completed.
    pub async fn clear(&self) -> Result<(), CheckpointError> {
        self.store
            .delete_state(&self.saga_id)
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        tracing::debug!(saga_id = %self.saga_id, "cleared saga snapshot");
        Ok(())
    }

    fn snapshot<C: Serialize>(&self, state: SagaState, context: &C) -> Result<SagaPersistedState, CheckpointError> {
        let context = serde_json::to_value(context).map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        Ok(SagaPersistedState {
            saga_id: self.saga_id.clone(),
            state,
            context,
            current_step_index: self.current_step_index,
            completed_steps: self.completed_steps.clone(),
            compensated_steps: self.compensated_steps.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        })
    }

    async fn write<C: Serialize>(&self, state: SagaState, context: &C) -> Result<(), CheckpointError> {
        let snapshot = self.snapshot(state, context)?;
        self.store
            .save_state(&self.saga_id, &snapshot)
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// CheckpointError
// ---------------------------------------------------------------------------

/// Errors from checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("state store error: {0}")]
    Storage(String),

    #[error("context serialization failed: {0}")]
    Serialization(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sagaflow_types::error::StorageError;
    use serde::Serializer;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<HashMap<String, SagaPersistedState>>,
        writes: Mutex<Vec<SagaState>>,
        deleted: Mutex<Vec<String>>,
    }

    impl SagaStateStore for RecordingStore {
        async fn save_state(&self, saga_id: &str, state: &SagaPersistedState) -> Result<(), StorageError> {
            self.writes.lock().unwrap().push(state.state);
            self.saved.lock().unwrap().insert(saga_id.to_string(), state.clone());
            Ok(())
        }

        async fn load_state(&self, saga_id: &str) -> Result<Option<SagaPersistedState>, StorageError> {
            Ok(self.saved.lock().unwrap().get(saga_id).cloned())
        }

        async fn delete_state(&self, saga_id: &str) -> Result<(), StorageError> {
            self.saved.lock().unwrap().remove(saga_id);
            self.deleted.lock().unwrap().push(saga_id.to_string());
            Ok(())
        }
    }

    struct FailingStore;

    impl SagaStateStore for FailingStore {
        async fn save_state(&self, _saga_id: &str, _state: &SagaPersistedState) -> Result<(), StorageError> {
            Err(StorageError::Connection("disk full".to_string()))
        }

        async fn load_state(&self, _saga_id: &str) -> Result<Option<SagaPersistedState>, StorageError> {
            Ok(None)
        }

        async fn delete_state(&self, _saga_id: &str) -> Result<(), StorageError> {
            Err(StorageError::Connection("disk full".to_string()))
        }
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("context holds a socket"))
        }
    }

    #[tokio::test]
    async fn test_snapshots_track_progress() {
        let store = RecordingStore::default();
        let mut checkpoints = CheckpointManager::new(&store, "order-1");
        let ctx = serde_json::json!({"order": 1});

        checkpoints.checkpoint_started(&ctx).await.unwrap();
        checkpoints.checkpoint_step_completed("reserve", 1, &ctx).await.unwrap();
        checkpoints.checkpoint_step_completed("charge", 2, &ctx).await.unwrap();

        let saved = store.load_state("order-1").await.unwrap().unwrap();
        assert_eq!(saved.state, SagaState::Running);
        assert_eq!(saved.current_step_index, 2);
        assert_eq!(saved.completed_steps, vec!["reserve", "charge"]);
        assert!(saved.compensated_steps.is_empty());
        assert_eq!(saved.context["order"], 1);
        assert!(saved.updated_at >= saved.created_at);
    }

    #[tokio::test]
    async fn test_compensation_and_terminal_snapshots() {
        let store = RecordingStore::default();
        let mut checkpoints = CheckpointManager::new(&store, "order-2");
        let ctx = serde_json::json!({});

        checkpoints.checkpoint_step_completed("reserve", 1, &ctx).await.unwrap();
        checkpoints.checkpoint_step_compensated("reserve", &ctx).await.unwrap();
        checkpoints
            .checkpoint_terminal(SagaState::CompensationCompleted, &ctx)
            .await
            .unwrap();

        let saved = store.load_state("order-2").await.unwrap().unwrap();
        assert_eq!(saved.state, SagaState::CompensationCompleted);
        assert_eq!(saved.compensated_steps, vec!["reserve"]);
        assert_eq!(
            *store.writes.lock().unwrap(),
            vec![SagaState::Running, SagaState::Compensating, SagaState::CompensationCompleted]
        );
    }

    #[tokio::test]
    async fn test_clear_deletes_snapshot() {
        let store = RecordingStore::default();
        let checkpoints = CheckpointManager::new(&store, "order-3");

        checkpoints.checkpoint_started(&serde_json::json!({})).await.unwrap();
        checkpoints.clear().await.unwrap();

        assert!(store.load_state("order-3").await.unwrap().is_none());
        assert_eq!(*store.deleted.lock().unwrap(), vec!["order-3"]);
    }

    #[tokio::test]
    async fn test_storage_error_is_mapped() {
        let store = FailingStore;
        let checkpoints = CheckpointManager::new(&store, "order-4");

        let err = checkpoints.checkpoint_started(&serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Storage(ref msg) if msg.contains("disk full")));
    }

    #[tokio::test]
    async fn test_serialization_error_is_mapped() {
        let store = RecordingStore::default();
        let checkpoints = CheckpointManager::new(&store, "order-5");

        let err = checkpoints.checkpoint_started(&Unserializable).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Serialization(_)));
        assert!(store.writes.lock().unwrap().is_empty());
    }
}
