use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Session already registered: {0}")]
    DuplicateSession(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(#[from] db::DbError),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("Session not found: {0}")]
    NotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
