//! Application-level errors (wraps domain and sync errors)

use thiserror::Error;

use crate::domain::DomainError;
use crate::infrastructure::SyncError;

/// Application errors wrap domain errors and add application-level context.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplicationError {
    #[error("{0}")]
    Domain(#[from] DomainError),

    /// The remote call failed. `rolled_back` tells whether the local tree
    /// was put back into its previous state (or re-fetched).
    #[error("sync failed: {context}")]
    SyncFailed {
        context: String,
        #[source]
        source: SyncError,
        rolled_back: bool,
    },

    #[error("config error: {message}")]
    Config { message: String },
}

impl ApplicationError {
    pub fn is_sync_failure(&self) -> bool {
        matches!(self, Self::SyncFailed { .. })
    }

    /// The domain error behind this failure, if it is one.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for application layer operations.
pub type ApplicationResult<T> = Result<T, ApplicationError>;
