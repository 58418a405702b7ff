//! Crucible Tools - the safety-gated tool registry
//!
//! Each tool is a self-contained module implementing the Tool trait. The
//! registry wraps every execution uniformly: budget accounting, telemetry
//! with display envelopes, in-band error extraction, and the settled hook.

pub mod context;
pub mod cursor;
pub mod envelope;
pub mod probe;
pub mod registry;
pub mod tools;

pub use context::{
    CallMetadata, OutputMessageSource, PersistentMemoryCoordinator, ScheduleGateway, SettledHook,
    TelemetryEvent, TelemetrySink, ToolBudget, ToolExecutionContext, ToolSettled,
};
pub use cursor::{decode_background_cursor, decode_normal_cursor, encode_cursor, SessionCursor};
pub use envelope::{ToolDisplayEnvelope, ToolPhase};
pub use registry::{error_message_from_reply, Tool, ToolRegistry};

use std::sync::Arc;

/// Create the builtin registry with every installed tool bound to `context`.
///
/// Edit this function to add or remove tools from the agent.
pub fn create_builtin_registry(context: Arc<ToolExecutionContext>) -> ToolRegistry {
    let mut registry = ToolRegistry::new(context.clone());

    // --- File and directory tools ---
    registry.register(tools::ls::LsTool::new(context.clone()));
    registry.register(tools::read::ReadTool::new(context.clone()));
    registry.register(tools::tree::TreeTool::new(context.clone()));
    registry.register(tools::ripgrep::RipgrepTool::new(context.clone()));
    registry.register(tools::write::WriteTool::new(context.clone()));
    registry.register(tools::cp::CpTool::new(context.clone()));
    registry.register(tools::mv::MvTool::new(context.clone()));

    // --- Subprocess tools ---
    registry.register(tools::git::GitTool::new(context.clone()));
    registry.register(tools::bash::BashTool::new(context.clone()));
    registry.register(tools::background::BackgroundTool::new(context.clone()));

    // --- Network ---
    registry.register(tools::webfetch::WebfetchTool::new(context.clone()));

    // --- Todo family ---
    for tool in tools::todo::todo_tools(context) {
        registry.register_arc(tool);
    }

    registry
}
