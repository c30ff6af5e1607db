//! Memory component error kinds (spec section 7)

use crate::store::StoreError;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory not found: {0}")]
    NotFound(String),
    #[error("invalid memory content: {0}")]
    InvalidContent(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<MemoryError> for StoreError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::Store(inner) => inner,
            MemoryError::Database(inner) => StoreError::from(inner),
            other => StoreError::Init(other.to_string()),
        }
    }
}
