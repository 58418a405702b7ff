//! Ls tool: directory listing via filesystem primitives.

use super::{err, permission_denied, require_workspace, required_str, resolve_path};
use crate::context::ToolExecutionContext;
use crate::registry::Tool;
use crucible_policy::{can_list_dir, should_hide_dir_entry};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub struct LsTool {
    context: Arc<ToolExecutionContext>,
}

impl LsTool {
    pub fn new(context: Arc<ToolExecutionContext>) -> Self {
        Self { context }
    }
}

#[async_trait::async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List a directory. Set all to include dotfiles, long for size and \
         modification time per entry."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dirpath": {
                    "type": "string",
                    "description": "Directory to list"
                },
                "all": {
                    "type": "boolean",
                    "description": "Include dotfiles (default false)"
                },
                "long": {
                    "type": "boolean",
                    "description": "Long format with size and mtime (default false)"
                }
            },
            "required": ["dirpath"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> Value {
        let dirpath = match required_str(&input, "dirpath") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let all = input.get("all").and_then(Value::as_bool).unwrap_or(false);
        let long = input.get("long").and_then(Value::as_bool).unwrap_or(false);

        let (root, ws) = match require_workspace(&self.context, "ls") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let resolved = resolve_path(&root, dirpath);
        if !can_list_dir(&resolved.to_string_lossy(), &self.context.permissions, &ws) {
            return permission_denied("ls");
        }

        let read_dir = match std::fs::read_dir(&resolved) {
            Ok(rd) => rd,
            Err(e) => return err(format!("Failed to list directory: {e}")),
        };

        let mut names: Vec<(String, std::fs::Metadata)> = Vec::new();
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if should_hide_dir_entry(&name) {
                continue;
            }
            if !all && name.starts_with('.') {
                continue;
            }
            let Ok(metadata) = entry.metadata() else { continue };
            names.push((name, metadata));
        }
        names.sort_by(|a, b| a.0.cmp(&b.0));

        let entries: Vec<String> = names
            .iter()
            .map(|(name, metadata)| {
                let display = if metadata.is_dir() {
                    format!("{name}/")
                } else {
                    name.clone()
                };
                if long {
                    let mtime = metadata
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| {
                            chrono::DateTime::from_timestamp(d.as_secs() as i64, 0)
                                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                                .unwrap_or_default()
                        })
                        .unwrap_or_default();
                    format!("{:>10}  {}  {}", metadata.len(), mtime, display)
                } else {
                    display
                }
            })
            .collect();

        debug!("ls: {} ({} entries)", dirpath, entries.len());
        json!({"dirpath": dirpath, "entries": entries, "count": entries.len()})
    }
}
