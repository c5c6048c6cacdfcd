//! Storage layer trait definitions and common types.

use crate::errors::StorageError;
use async_trait::async_trait;

/// Result type alias for storage operations.
///
/// All storage operations return this type for consistent error handling.
pub type StorageResult<T> = Result<T, StorageError>;

/// Core storage trait for health monitoring.
///
/// All storage implementations must be `Send + Sync` to work properly in the
/// async runtime environment with multiple concurrent operations.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Performs a lightweight health check on the storage backend.
    ///
    /// For database implementations, a simple `SELECT 1` query is sufficient.
    async fn health_check(&self) -> StorageResult<()>;
}
