//! Domain layer: the item forest and its structural operations
//!
//! This layer is independent of external concerns (no I/O, no sync, no config loading).

pub mod arena;
pub mod builder;
pub mod entities;
pub mod error;
pub mod filter;
pub mod flatten;

pub use arena::{DetachedSubtree, ItemArena, TreeNode};
pub use builder::ItemTreeBuilder;
pub use entities::*;
pub use error::{DomainError, DomainResult};
pub use filter::{eligible_target_ids, eligible_targets, excluded_set};
pub use flatten::{flatten, ExpansionState, FlatNode};
