//! Crucible Core - shared types, error handling, and the invocation contract

pub mod error;
pub mod invocation;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
