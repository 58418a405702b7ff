//! Mv tool: rename with a copy-then-delete fallback across devices.

use super::cp::copy_tree;
use super::{err, permission_denied, require_workspace, required_str, resolve_path};
use crate::context::ToolExecutionContext;
use crate::registry::Tool;
use crucible_policy::{can_move_from, can_move_to};
use serde_json::{json, Value};
use std::sync::Arc;

const EXDEV: i32 = 18;

pub struct MvTool {
    context: Arc<ToolExecutionContext>,
}

impl MvTool {
    pub fn new(context: Arc<ToolExecutionContext>) -> Self {
        Self { context }
    }
}

#[async_trait::async_trait]
impl Tool for MvTool {
    fn name(&self) -> &str {
        "mv"
    }

    fn description(&self) -> &str {
        "Move or rename a file or directory. Refuses to replace an existing \
         destination unless overwrite is set."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": {"type": "string"},
                "destination": {"type": "string"},
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
        let overwrite = input.get("overwrite").and_then(Value::as_bool).unwrap_or(false);

        let (root, ws) = match require_workspace(&self.context, "mv") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let from = resolve_path(&root, source);
        let to = resolve_path(&root, destination);
        if !can_move_from(&from.to_string_lossy(), &self.context.permissions, &ws)
            || !can_move_to(&to.to_string_lossy(), &self.context.permissions, &ws)
        {
            return permission_denied("mv");
        }

        if !from.exists() {
            return err(format!("Source not found: {source}"));
        }
        if to.exists() && !overwrite {
            return err(format!("Destination exists: {destination}"));
        }
        if let Some(parent) = to.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return err(format!("Failed to create directories: {e}"));
            }
        }

        match std::fs::rename(&from, &to) {
            Ok(()) => json!({"success": true, "source": source, "destination": destination}),
            Err(e) if e.raw_os_error() == Some(EXDEV) => {
                // Cross-device move: copy then delete.
                let copy_result = if from.is_dir() {
                    copy_tree(&from, &to).map(|_| ())
                } else {
                    std::fs::copy(&from, &to).map(|_| ())
                };
                if let Err(e) = copy_result {
                    return err(format!("Failed to move: {e}"));
                }
                let remove_result = if from.is_dir() {
                    std::fs::remove_dir_all(&from)
                } else {
                    std::fs::remove_file(&from)
                };
                match remove_result {
                    Ok(()) => {
                        json!({"success": true, "source": source, "destination": destination, "crossDevice": true})
                    }
                    Err(e) => err(format!("Copied but failed to remove source: {e}")),
                }
            }
            Err(e) => err(format!("Failed to move: {e}")),
        }
    }
}
