//! Crucible LLM - the model executor contract
//!
//! Provider SDK wiring lives outside this workspace; the runner only depends
//! on the `ModelExecutor` trait and its outcome types.

pub mod executor;
pub mod types;

pub use executor::{ModelExecutor, StreamHandle, TextStream};
pub use types::{FinishReason, GenerateOutcome, GenerateRequest, TokenUsage, ToolSpec};
