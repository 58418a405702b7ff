//! Read tool: file contents as indexed lines.

use super::{err, permission_denied, require_workspace, required_str, resolve_path};
use crate::context::ToolExecutionContext;
use crate::registry::Tool;
use crucible_policy::can_read_file;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

pub struct ReadTool {
    context: Arc<ToolExecutionContext>,
}

impl ReadTool {
    pub fn new(context: Arc<ToolExecutionContext>) -> Self {
        Self { context }
    }
}

#[async_trait::async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Returns the byte size and indexed lines."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filepath": {
                    "type": "string",
                    "description": "Absolute or workspace-relative path to read"
                }
            },
            "required": ["filepath"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> Value {
        let filepath = match required_str(&input, "filepath") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let (root, ws) = match require_workspace(&self.context, "read") {
            Ok(v) => v,
            Err(e) => return e,
        };

        let resolved = resolve_path(&root, filepath);
        if !can_read_file(&resolved.to_string_lossy(), &self.context.permissions, &ws) {
            return permission_denied("read");
        }

        let content = match fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return err(format!("Failed to read file: {e}")),
        };

        let lines: Vec<Value> = content
            .lines()
            .enumerate()
            .map(|(i, line)| json!([i, line]))
            .collect();

        debug!("read: {} ({} bytes)", filepath, content.len());
        json!({"size": content.len(), "content": lines})
    }
}
