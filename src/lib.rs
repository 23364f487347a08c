//! Hierarchical item tree with optimistic remote synchronization.
//!
//! The forest lives in an arena (`domain::ItemArena`), is flattened into
//! display rows on demand (`domain::flatten`), and is mutated through
//! `application::services::TreeService`, which keeps it in step with a
//! remote API behind `infrastructure::SyncAdapter`.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod util;

pub use application::services::TreeService;
pub use application::{ApplicationError, ApplicationResult};
pub use config::Settings;
pub use domain::{
    DomainError, DomainResult, ExpansionState, FlatNode, ItemArena, ItemDescriptor, ItemFields,
    ItemId, NestedItem, Quantity,
};
pub use infrastructure::{MemorySyncAdapter, SyncAdapter, SyncError, SyncOp};
