//! Git tool: runs git subcommands inside the workspace.

use super::{err, permission_denied, require_workspace};
use crate::context::ToolExecutionContext;
use crate::probe::git_available;
use crate::registry::Tool;
use crucible_policy::{can_use_git, has_sensitive_path_reference};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

const MAX_OUTPUT_CHARS: usize = 30_000;

pub struct GitTool {
    context: Arc<ToolExecutionContext>,
}

impl GitTool {
    pub fn new(context: Arc<ToolExecutionContext>) -> Self {
        Self { context }
    }
}

fn clip(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_CHARS {
        return s.to_string();
    }
    let mut cut = MAX_OUTPUT_CHARS;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... [truncated, {} total chars]", &s[..cut], s.len())
}

#[async_trait::async_trait]
impl Tool for GitTool {
    fn name(&self) -> &str {
        "git"
    }

    fn description(&self) -> &str {
        "Run a git subcommand in the workspace, e.g. args [\"status\", \"-s\"]. \
         Captures stdout and stderr."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "args": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Arguments passed to git"
                }
            },
            "required": ["args"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> Value {
        let args: Vec<String> = match input.get("args").and_then(Value::as_array) {
            Some(values) => {
                let mut args = Vec::with_capacity(values.len());
                for v in values {
                    match v.as_str() {
                        Some(s) => args.push(s.to_string()),
                        None => return err("Invalid input"),
                    }
                }
                args
            }
            None => return err("Invalid input"),
        };
        if args.is_empty() {
            return err("Invalid input");
        }

        let (root, ws) = match require_workspace(&self.context, "git") {
            Ok(v) => v,
            Err(e) => return e,
        };
        if !can_use_git(&root.to_string_lossy(), &self.context.permissions, &ws) {
            return permission_denied("git");
        }
        let command_text = args.join(" ");
        if has_sensitive_path_reference(&command_text, &ws, &root.to_string_lossy()) {
            return err("Permission denied: git command references protected path");
        }

        if !git_available().await {
            return err("git command is not available in runtime environment");
        }

        debug!("git {:?}", args);
        let output = match Command::new("git").args(&args).current_dir(&root).output().await {
            Ok(o) => o,
            Err(e) => return err(format!("Failed to execute git: {e}")),
        };

        json!({
            "success": output.status.success(),
            "exitCode": output.status.code().unwrap_or(-1),
            "stdout": clip(String::from_utf8_lossy(&output.stdout).trim_end()),
            "stderr": clip(String::from_utf8_lossy(&output.stderr).trim_end()),
        })
    }
}
