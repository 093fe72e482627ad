//! Error types shared by the disk store and the cache orchestrator.

use thiserror::Error;

/// Cache-related errors.
///
/// Only construction failures ever reach callers of [`crate::cache::Cache`];
/// everything else is absorbed there and shows up as "no effect". The
/// [`crate::disk::DiskStore`] API returns these errors directly so that
/// filesystem failures stay distinguishable from "not found".
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during cache operations
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// Stored metadata could not be encoded or decoded
    #[error("Cache metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// The disk I/O queue has shut down
    #[error("Disk I/O queue is closed")]
    QueueClosed,
}

impl CacheError {
    /// Returns true if the error comes from the filesystem.
    pub fn is_io(&self) -> bool {
        matches!(self, CacheError::Io(_))
    }
}
