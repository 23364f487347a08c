//! Infrastructure layer: sync adapter boundary and DI container
//!
//! This layer defines the remote boundary trait, ships an in-memory
//! implementation, and wires up services.

pub mod di;
pub mod error;
pub mod traits;

pub use error::{SyncError, SyncResult};
pub use traits::{MemorySyncAdapter, SyncAdapter, SyncOp};
