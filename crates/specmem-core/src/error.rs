//! Crate-wide error type
//!
//! Each component owns a focused `thiserror` enum (see `dimension::DimensionError`,
//! `store::StoreError`, `embedding::EmbeddingError`, ...). `SpecMemError` aggregates
//! them at the facade boundary so callers that don't care which component failed
//! can match on the tagged kinds from spec section 7.

use crate::dimension::DimensionError;
use crate::embedding::EmbeddingError;
use crate::memory::MemoryError;
use crate::queue::QueueError;
use crate::store::StoreError;
use crate::sync::SyncError;

/// Aggregate error type surfaced by the public facade
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SpecMemError {
    /// Lookup by id/path missed
    #[error("not found: {0}")]
    NotFound(String),
    /// Malformed input (empty content, bad enum, out-of-range number)
    #[error("validation error: {0}")]
    ValidationError(String),
    /// Cross-project read attempted
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Dimension service error
    #[error("dimension error: {0}")]
    Dimension(#[from] DimensionError),
    /// Store adapter error
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Embedding provider/cache error
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(#[from] EmbeddingError),
    /// Memory store error
    #[error("memory error: {0}")]
    Memory(MemoryError),
    /// Change queue rejected an enqueue
    #[error("queue full")]
    QueueFull,
    /// Resync/scan ran out of time
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
    /// Operation aborted by caller
    #[error("cancelled")]
    Cancelled,
}

impl From<QueueError> for SpecMemError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Full => SpecMemError::QueueFull,
        }
    }
}

impl From<MemoryError> for SpecMemError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::PermissionDenied(msg) => SpecMemError::PermissionDenied(msg),
            MemoryError::NotFound(msg) => SpecMemError::NotFound(msg),
            other => SpecMemError::Memory(other),
        }
    }
}

impl From<SyncError> for SpecMemError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::DeadlineExceeded(msg) => SpecMemError::DeadlineExceeded(msg),
            SyncError::Store(inner) => SpecMemError::Store(inner),
            SyncError::Cancelled => SpecMemError::Cancelled,
        }
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, SpecMemError>;
