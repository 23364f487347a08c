//! Application services
//!
//! Concrete service implementations that orchestrate domain logic.
//! Services depend on the `SyncAdapter` boundary trait but are themselves
//! concrete structs, not traits.

mod tree;

pub use tree::TreeService;
