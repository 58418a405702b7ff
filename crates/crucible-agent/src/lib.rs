//! Crucible Agent - session state and the task runner
//!
//! The session owns one message list and one structured context; the runner
//! drives a task as a bounded sequence of model segments with continuation
//! and budget control.

pub mod config;
pub mod hooks;
pub mod middleware;
pub mod runner;
pub mod session;

pub use config::AgentExecutionConfig;
pub use hooks::{NoopMemoryHooks, PersistentMemoryHooks, TaskHookOutcome};
pub use middleware::{ExtractContextMiddleware, FencedContextPatchExtractor};
pub use runner::{
    classify_segment_outcome, reconcile_todo_cursor, todo_progress_from_tool_output,
    ClassifyInput, CursorReconciliation, Runner, RunnerDependencies, SegmentOutcome, StopReason,
    TaskMeta, TaskRunResult,
};
pub use session::{FinishOptions, Session, SessionSnapshot, TaskBegin, TaskFinish, TurnOptions};
