//! Write tool: create, overwrite, or append to a file.

use super::{err, permission_denied, require_workspace, required_str, resolve_path};
use crate::context::ToolExecutionContext;
use crate::registry::Tool;
use crucible_policy::can_write_file;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

pub struct WriteTool {
    context: Arc<ToolExecutionContext>,
}

impl WriteTool {
    pub fn new(context: Arc<ToolExecutionContext>) -> Self {
        Self { context }
    }
}

#[async_trait::async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. \
         Set append to add to the existing content instead of replacing it."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filepath": {
                    "type": "string",
                    "description": "Path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                },
                "append": {
                    "type": "boolean",
                    "description": "Append to existing content (default false)"
                }
            },
            "required": ["filepath", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> Value {
        let filepath = match required_str(&input, "filepath") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match required_str(&input, "content") {
            Ok(c) => c.to_string(),
            Err(e) => return e,
        };
        let append = input.get("append").and_then(Value::as_bool).unwrap_or(false);

        let (root, ws) = match require_workspace(&self.context, "write") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let resolved = resolve_path(&root, filepath);
        if !can_write_file(&resolved.to_string_lossy(), &self.context.permissions, &ws) {
            return permission_denied("write");
        }

        if let Some(parent) = resolved.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return err(format!("Failed to create directories: {e}"));
            }
        }

        let bytes = if append {
            let existing = fs::read_to_string(&resolved).await.unwrap_or_default();
            let combined = format!("{existing}{content}");
            let len = combined.len();
            if let Err(e) = fs::write(&resolved, combined).await {
                return err(format!("Failed to write: {e}"));
            }
            len
        } else {
            if let Err(e) = fs::write(&resolved, &content).await {
                return err(format!("Failed to write: {e}"));
            }
            content.len()
        };

        debug!("write: {} ({} bytes, append={})", filepath, bytes, append);
        json!({"success": true, "filepath": filepath, "bytes": bytes, "append": append})
    }
}
