//! Identifier types shared by the order store, message bus and saga crates.

pub mod types;

pub use types::{CorrelationId, OrderId, ReferenceId, UserId};
