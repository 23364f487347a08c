//! Application layer: services and use cases
//!
//! This layer orchestrates domain logic and depends on the sync boundary trait.

pub mod error;
pub mod services;

pub use error::{ApplicationError, ApplicationResult};
