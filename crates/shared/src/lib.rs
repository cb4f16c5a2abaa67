//! Shared types for the bazaar notification client: wire models, broker topics,
//! the STOMP frame codec and the error types used across crates.

pub mod error;
pub mod models;
pub mod protocol;
pub mod topics;

pub use error::*;
pub use models::*;
pub use protocol::*;
