//! Builtin tool implementations, one module per tool.

pub mod background;
pub mod bash;
pub mod cp;
pub mod git;
pub mod ls;
pub mod mv;
pub mod read;
pub mod ripgrep;
pub mod todo;
pub mod tree;
pub mod webfetch;
pub mod write;

use crate::context::ToolExecutionContext;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub(crate) fn err(message: impl Into<String>) -> Value {
    json!({"error": message.into()})
}

pub(crate) fn err_detail(message: impl Into<String>, detail: impl Into<String>) -> Value {
    json!({"error": message.into(), "detail": detail.into()})
}

pub(crate) fn permission_denied(tool: &str) -> Value {
    err(format!("Permission denied: {tool} path not allowed"))
}

/// Workspace root and its policy-facing string form, or the in-band error.
pub(crate) fn require_workspace(
    context: &ToolExecutionContext,
    tool: &str,
) -> Result<(PathBuf, String), Value> {
    match (context.workspace.clone(), context.workspace_str()) {
        (Some(root), Some(s)) => Ok((root, s)),
        _ => Err(err(format!(
            "Workspace unavailable: {tool} tools require context.workspace"
        ))),
    }
}

/// Absolute paths pass through; relative paths resolve against the
/// workspace root.
pub(crate) fn resolve_path(workspace: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        workspace.join(p)
    }
}

pub(crate) fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, Value> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| err_detail("Invalid input", format!("missing required parameter: {key}")))
}
