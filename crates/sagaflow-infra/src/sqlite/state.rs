//! SQLite saga state store implementation.
//!
//! Implements `SagaStateStore` from `sagaflow-core` on top of
//! [`SagaDatabase`]. Contexts and step-id lists are stored as JSON text.

use chrono::{DateTime, Utc};
use sagaflow_core::saga::SagaStateStore;
use sagaflow_types::error::StorageError;
use sagaflow_types::saga::{SagaPersistedState, SagaState};
use serde::Serialize;
use sqlx::Row;

use super::pool::SagaDatabase;

/// SQLite-backed implementation of `SagaStateStore`.
#[derive(Clone)]
pub struct SqliteStateStore {
    db: SagaDatabase,
}

impl SqliteStateStore {
    pub fn new(db: SagaDatabase) -> Self {
        Self { db }
    }

    /// All snapshots currently in `state`, oldest update first.
    ///
    /// Operators use this to find sagas that failed or stalled mid-way.
    pub async fn list_by_state(&self, state: SagaState) -> Result<Vec<SagaPersistedState>, StorageError> {
        let rows = sqlx::query("SELECT * FROM saga_states WHERE state = ? ORDER BY updated_at ASC")
            .bind(state.as_str())
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        let mut states = Vec::with_capacity(rows.len());
        for row in &rows {
            let saga_row = SagaRow::from_row(row).map_err(|e| StorageError::Query(e.to_string()))?;
            states.push(saga_row.into_state()?);
        }

        Ok(states)
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct SagaRow {
    saga_id: String,
    state: String,
    context: String,
    current_step_index: i64,
    completed_steps: String,
    compensated_steps: String,
    created_at: String,
    updated_at: String,
}

impl SagaRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            saga_id: row.try_get("saga_id")?,
            state: row.try_get("state")?,
            context: row.try_get("context")?,
            current_step_index: row.try_get("current_step_index")?,
            completed_steps: row.try_get("completed_steps")?,
            compensated_steps: row.try_get("compensated_steps")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_state(self) -> Result<SagaPersistedState, StorageError> {
        let state: SagaState = self
            .state
            .parse()
            .map_err(|e| StorageError::Serialization(format!("invalid saga state: {e}")))?;
        let context = serde_json::from_str(&self.context)
            .map_err(|e| StorageError::Serialization(format!("invalid context JSON: {e}")))?;
        let completed_steps = parse_id_list(&self.completed_steps)?;
        let compensated_steps = parse_id_list(&self.compensated_steps)?;
        let current_step_index = usize::try_from(self.current_step_index)
            .map_err(|e| StorageError::Serialization(format!("invalid step index: {e}")))?;

        Ok(SagaPersistedState {
            saga_id: self.saga_id,
            state,
            context,
            current_step_index,
            completed_steps,
            compensated_steps,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_id_list(s: &str) -> Result<Vec<String>, StorageError> {
    serde_json::from_str(s).map_err(|e| StorageError::Serialization(format!("invalid step id list: {e}")))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// SagaStateStore implementation
// ---------------------------------------------------------------------------

impl SagaStateStore for SqliteStateStore {
    async fn save_state(&self, saga_id: &str, state: &SagaPersistedState) -> Result<(), StorageError> {
        let context = to_json(&state.context)?;
        let completed_steps = to_json(&state.completed_steps)?;
        let compensated_steps = to_json(&state.compensated_steps)?;
        let current_step_index = i64::try_from(state.current_step_index)
            .map_err(|e| StorageError::Serialization(format!("step index out of range: {e}")))?;

        sqlx::query(
            r#"INSERT INTO saga_states
                   (saga_id, state, context, current_step_index, completed_steps, compensated_steps, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (saga_id) DO UPDATE SET
                   state = excluded.state,
                   context = excluded.context,
                   current_step_index = excluded.current_step_index,
                   completed_steps = excluded.completed_steps,
                   compensated_steps = excluded.compensated_steps,
                   updated_at = excluded.updated_at"#,
        )
        .bind(saga_id)
        .bind(state.state.as_str())
        .bind(&context)
        .bind(current_step_index)
        .bind(&completed_steps)
        .bind(&compensated_steps)
        .bind(format_datetime(&state.created_at))
        .bind(format_datetime(&state.updated_at))
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        tracing::debug!(saga_id, state = %state.state, "saved saga snapshot");
        Ok(())
    }

    async fn load_state(&self, saga_id: &str) -> Result<Option<SagaPersistedState>, StorageError> {
        let row = sqlx::query("SELECT * FROM saga_states WHERE saga_id = ?")
            .bind(saga_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let saga_row = SagaRow::from_row(&row).map_err(|e| StorageError::Query(e.to_string()))?;
                Ok(Some(saga_row.into_state()?))
            }
            None => Ok(None),
        }
    }

    async fn delete_state(&self, saga_id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM saga_states WHERE saga_id = ?")
            .bind(saga_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        tracing::debug!(saga_id, "deleted saga snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagaflow_core::saga::{FnStep, SagaOrchestrator, StepResult};
    use sagaflow_types::config::SagaOptions;

    async fn test_database() -> SagaDatabase {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        std::mem::forget(dir);
        SagaDatabase::open(&db_path).await.unwrap()
    }

    fn snapshot(saga_id: &str, state: SagaState) -> SagaPersistedState {
        let now = Utc::now();
        SagaPersistedState {
            saga_id: saga_id.to_string(),
            state,
            context: serde_json::json!({"order_id": 42, "items": ["book"]}),
            current_step_index: 1,
            completed_steps: vec!["reserve".to_string()],
            compensated_steps: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = SqliteStateStore::new(test_database().await);
        let saved = snapshot("order-1", SagaState::Running);

        store.save_state("order-1", &saved).await.unwrap();
        let loaded = store.load_state("order-1").await.unwrap().unwrap();

        assert_eq!(loaded.saga_id, "order-1");
        assert_eq!(loaded.state, SagaState::Running);
        assert_eq!(loaded.context, saved.context);
        assert_eq!(loaded.current_step_index, 1);
        assert_eq!(loaded.completed_steps, vec!["reserve"]);
        assert!(loaded.compensated_steps.is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let store = SqliteStateStore::new(test_database().await);
        assert!(store.load_state("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_and_keeps_created_at() {
        let store = SqliteStateStore::new(test_database().await);
        let first = snapshot("order-2", SagaState::Running);
        store.save_state("order-2", &first).await.unwrap();

        let mut second = first.clone();
        second.state = SagaState::CompensationCompleted;
        second.compensated_steps = vec!["reserve".to_string()];
        second.updated_at = first.updated_at + chrono::Duration::seconds(5);
        second.created_at = first.created_at + chrono::Duration::seconds(5);
        store.save_state("order-2", &second).await.unwrap();

        let loaded = store.load_state("order-2").await.unwrap().unwrap();
        assert_eq!(loaded.state, SagaState::CompensationCompleted);
        assert_eq!(loaded.compensated_steps, vec!["reserve"]);
        assert_eq!(
            loaded.created_at.timestamp_millis(),
            first.created_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = SqliteStateStore::new(test_database().await);
        store
            .save_state("order-3", &snapshot("order-3", SagaState::Running))
            .await
            .unwrap();

        store.delete_state("order-3").await.unwrap();
        store.delete_state("order-3").await.unwrap();

        assert!(store.load_state("order-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_state() {
        let store = SqliteStateStore::new(test_database().await);
        store
            .save_state("a", &snapshot("a", SagaState::CompensationFailed))
            .await
            .unwrap();
        store
            .save_state("b", &snapshot("b", SagaState::Running))
            .await
            .unwrap();
        store
            .save_state("c", &snapshot("c", SagaState::CompensationFailed))
            .await
            .unwrap();

        let failed = store.list_by_state(SagaState::CompensationFailed).await.unwrap();
        let mut ids: Vec<&str> = failed.iter().map(|s| s.saga_id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[derive(Debug, Default, Serialize)]
    struct Booking {
        hotel: Option<String>,
    }

    #[tokio::test]
    async fn test_orchestrator_persists_failed_saga() {
        let store = SqliteStateStore::new(test_database().await);
        let orchestrator = SagaOrchestrator::new(SagaOptions::default().with_state_persistence(true))
            .with_saga_id("trip-1")
            .with_state_store(store.clone())
            .step(
                FnStep::new("hotel", |ctx: &mut Booking| {
                    Box::pin(async move {
                        ctx.hotel = Some("H-1".to_string());
                        Ok(StepResult::success())
                    })
                })
                .with_compensation(|ctx: &mut Booking| {
                    Box::pin(async move {
                        ctx.hotel = None;
                        Ok(StepResult::success())
                    })
                }),
            )
            .step(FnStep::new("flight", |_ctx: &mut Booking| {
                Box::pin(async move { Ok(StepResult::failure("no seats")) })
            }));

        let result = orchestrator.run(Booking::default()).await;
        assert_eq!(result.state, SagaState::CompensationCompleted);

        let saved = store.load_state("trip-1").await.unwrap().unwrap();
        assert_eq!(saved.state, SagaState::CompensationCompleted);
        assert_eq!(saved.completed_steps, vec!["hotel"]);
        assert_eq!(saved.compensated_steps, vec!["hotel"]);
        assert_eq!(saved.context["hotel"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_orchestrator_deletes_completed_saga() {
        let store = SqliteStateStore::new(test_database().await);
        let orchestrator = SagaOrchestrator::new(SagaOptions::default().with_state_persistence(true))
            .with_saga_id("trip-2")
            .with_state_store(store.clone())
            .step(FnStep::new("hotel", |ctx: &mut Booking| {
                Box::pin(async move {
                    ctx.hotel = Some("H-2".to_string());
                    Ok(StepResult::success())
                })
            }));

        let result = orchestrator.run(Booking::default()).await;

        assert!(result.is_success);
        assert!(store.load_state("trip-2").await.unwrap().is_none());
    }
}
