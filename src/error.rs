//! Error types shared by the quest engine, the document store and the services.

use thiserror::Error;

/// Contract violations raised by the quest progress engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Toggle target is not in any bucket
    #[error("quest not found: {0}")]
    QuestNotFound(String),
    /// Requested bucket is not a known granularity
    #[error("invalid granularity: {0}")]
    InvalidGranularity(String),
    /// Stored state breaks an engine invariant
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    /// Quest time limit has passed
    #[error("quest expired: {0}")]
    QuestExpired(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures from a document store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("document already exists: {0}")]
    AlreadyExists(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Errors surfaced by the services to the HTTP layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("user already exists: {0}")]
    UserExists(String),
    #[error("{0}")]
    Validation(String),
    #[error("admin password required")]
    Unauthorized,
    #[error("catalog error: {0}")]
    Catalog(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
