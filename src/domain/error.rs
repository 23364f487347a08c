//! Domain-level errors (no external dependencies)

use thiserror::Error;

use crate::domain::entities::ItemId;

/// Domain errors represent structural rule violations on the item forest.
/// They are detected before any mutation, so a failed operation leaves the
/// forest unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("item not found: {0}")]
    NotFound(ItemId),

    #[error("cannot move {node} under {target}: target is the item itself or one of its descendants")]
    CycleRejected { node: ItemId, target: ItemId },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("duplicate item id: {0}")]
    DuplicateId(ItemId),

    #[error("tree invariant violated: {0}")]
    InvariantViolated(String),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
