//! Crucible Memory - the session's structured context and its policy pipeline
//!
//! The pipeline is sanitize -> merge -> compact -> project. Every function is
//! pure: inputs are never mutated, the session owns the single writable copy.

pub mod block;
pub mod codec;
pub mod compact;
pub mod context;
pub mod merge;
pub mod model_context;
pub mod policy;
pub mod project;
pub mod sanitize;

pub use block::{quality, BlockStatus, MemoryBlock};
pub use codec::{ContextCodec, JsonContextCodec};
pub use compact::compact_raw_for_storage;
pub use context::{
    ActiveTaskMeta, AgentContext, LastTask, MemoryTiers, RuntimeState, TaskCheckpoint,
    TodoCursor, TodoCursorNext, TodoCursorPhase, TodoProgress,
};
pub use merge::merge_context_with_memory_policy;
pub use model_context::{to_model_context_v2, ModelContextV2};
pub use policy::{Tier, TierPolicy};
pub use project::{
    build_injected_projection, estimate_model_context_tokens, project_context_snapshot_v2,
    ContextSnapshotV2, DropReason, ProjectionDebug, ProjectionOptions,
};
pub use sanitize::{sanitize_incoming_context_patch, ContextPatch, MemoryPatch, PatchSource, TodoPatch};
