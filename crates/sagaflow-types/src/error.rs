use thiserror::Error;

/// Errors from saga state-store operations (used by the `SagaStateStore`
/// port in sagaflow-core and its adapters in sagaflow-infra).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("saga state not found: {0}")]
    NotFound(String),
}
