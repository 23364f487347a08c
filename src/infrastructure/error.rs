//! Sync adapter errors

use thiserror::Error;

/// Failures reported by a sync adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed remote data: {0}")]
    Malformed(String),

    #[error("remote item not found: {0}")]
    NotFound(u64),
}

/// Result type for sync adapter operations.
pub type SyncResult<T> = Result<T, SyncError>;
