//! Ripgrep tool: spawns `rg` with a deterministic argument order.

use super::{err, permission_denied, require_workspace, required_str, resolve_path};
use crate::context::ToolExecutionContext;
use crate::registry::Tool;
use crucible_policy::{can_ripgrep, ripgrep_exclude_globs};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

const MAX_OUTPUT_CHARS: usize = 30_000;

pub struct RipgrepTool {
    context: Arc<ToolExecutionContext>,
}

impl RipgrepTool {
    pub fn new(context: Arc<ToolExecutionContext>) -> Self {
        Self { context }
    }
}

#[async_trait::async_trait]
impl Tool for RipgrepTool {
    fn name(&self) -> &str {
        "ripgrep"
    }

    fn description(&self) -> &str {
        "Search file contents under a directory with a regex pattern. \
         Optionally case sensitive and filtered by a file glob."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dirpath": {
                    "type": "string",
                    "description": "Directory to search"
                },
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern"
                },
                "caseSensitive": {
                    "type": "boolean",
                    "description": "Match case exactly (default false)"
                },
                "fileGlob": {
                    "type": "string",
                    "description": "Glob filter, e.g. '*.rs'"
                }
            },
            "required": ["dirpath", "pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> Value {
        let dirpath = match required_str(&input, "dirpath") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let pattern = match required_str(&input, "pattern") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let case_sensitive = input
            .get("caseSensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let file_glob = input.get("fileGlob").and_then(Value::as_str);

        let (root, ws) = match require_workspace(&self.context, "ripgrep") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let resolved = resolve_path(&root, dirpath);
        let resolved_str = resolved.to_string_lossy().into_owned();
        if !can_ripgrep(&resolved_str, &self.context.permissions, &ws) {
            return permission_denied("ripgrep");
        }

        // Argument order is fixed: [-i?, -g glob?, -g excludes..., pattern, dir].
        let mut args: Vec<String> = Vec::new();
        if !case_sensitive {
            args.push("-i".to_string());
        }
        if let Some(glob) = file_glob {
            args.push("-g".to_string());
            args.push(glob.to_string());
        }
        for exclude in ripgrep_exclude_globs(&resolved_str) {
            args.push("-g".to_string());
            args.push(exclude);
        }
        args.push(pattern.to_string());
        args.push(resolved_str.clone());

        debug!("ripgrep: {:?}", args);
        let output = match Command::new("rg").args(&args).output().await {
            Ok(o) => o,
            Err(_) => return err("ripgrep command is not available in runtime environment"),
        };

        // rg exits 1 when nothing matched; that is not a failure.
        let code = output.status.code().unwrap_or(-1);
        if code > 1 {
            return err(format!(
                "ripgrep failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let mut content = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut truncated = false;
        if content.len() > MAX_OUTPUT_CHARS {
            let mut cut = MAX_OUTPUT_CHARS;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            truncated = true;
        }

        let mut reply = json!({
            "dirpath": dirpath,
            "pattern": pattern,
            "matches": content,
            "matched": code == 0,
        });
        if truncated {
            reply["truncated"] = Value::Bool(true);
        }
        reply
    }
}
