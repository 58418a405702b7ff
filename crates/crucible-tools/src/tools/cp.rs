//! Cp tool: filesystem-level copy.

use super::{err, permission_denied, require_workspace, required_str, resolve_path};
use crate::context::ToolExecutionContext;
use crate::registry::Tool;
use crucible_policy::{can_copy_from, can_copy_to};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

pub struct CpTool {
    context: Arc<ToolExecutionContext>,
}

impl CpTool {
    pub fn new(context: Arc<ToolExecutionContext>) -> Self {
        Self { context }
    }
}

pub(crate) fn copy_tree(source: &Path, destination: &Path) -> std::io::Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let target = destination.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[async_trait::async_trait]
impl Tool for CpTool {
    fn name(&self) -> &str {
        "cp"
    }

    fn description(&self) -> &str {
        "Copy a file or (with recursive) a directory. Refuses to replace an \
         existing destination unless overwrite is set."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": {"type": "string"},
                "destination": {"type": "string"},
                "recursive": {"type": "boolean", "description": "Copy directories (default false)"},
                "overwrite": {"type": "boolean", "description": "Replace existing destination (default false)"}
            },
            "required": ["source", "destination"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> Value {
        let source = match required_str(&input, "source") {
            Ok(s) => s,
            Err(e) => return e,
        };
        let destination = match required_str(&input, "destination") {
            Ok(d) => d,
            Err(e) => return e,
        };
        let recursive = input.get("recursive").and_then(Value::as_bool).unwrap_or(false);
        let overwrite = input.get("overwrite").and_then(Value::as_bool).unwrap_or(false);

        let (root, ws) = match require_workspace(&self.context, "cp") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let from = resolve_path(&root, source);
        let to = resolve_path(&root, destination);
        if !can_copy_from(&from.to_string_lossy(), &self.context.permissions, &ws)
            || !can_copy_to(&to.to_string_lossy(), &self.context.permissions, &ws)
        {
            return permission_denied("cp");
        }

        if !from.exists() {
            return err(format!("Source not found: {source}"));
        }
        if to.exists() && !overwrite {
            return err(format!("Destination exists: {destination}"));
        }

        if from.is_dir() {
            if !recursive {
                return err(format!("Source is a directory (set recursive): {source}"));
            }
            match copy_tree(&from, &to) {
                Ok(files) => json!({"success": true, "source": source, "destination": destination, "files": files}),
                Err(e) => err(format!("Failed to copy: {e}")),
            }
        } else {
            if let Some(parent) = to.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    return err(format!("Failed to create directories: {e}"));
                }
            }
            match std::fs::copy(&from, &to) {
                Ok(bytes) => json!({"success": true, "source": source, "destination": destination, "bytes": bytes}),
                Err(e) => err(format!("Failed to copy: {e}")),
            }
        }
    }
}
