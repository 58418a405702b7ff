//! Tree tool: recursive directory rendering.

use super::{err, permission_denied, require_workspace, required_str, resolve_path};
use crate::context::ToolExecutionContext;
use crate::registry::Tool;
use crucible_policy::{can_read_tree, should_hide_dir_entry};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

const DEFAULT_LEVEL: usize = 3;

pub struct TreeTool {
    context: Arc<ToolExecutionContext>,
}

impl TreeTool {
    pub fn new(context: Arc<ToolExecutionContext>) -> Self {
        Self { context }
    }
}

struct TreeState {
    lines: Vec<String>,
    dirs: usize,
    files: usize,
    show_hidden: bool,
}

fn render_dir(dir: &Path, prefix: &str, depth: usize, state: &mut TreeState) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<std::fs::DirEntry> = read_dir
        .flatten()
        .filter(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            if should_hide_dir_entry(&name) {
                return false;
            }
            state.show_hidden || !name.starts_with('.')
        })
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let count = entries.len();
    for (i, entry) in entries.into_iter().enumerate() {
        let last = i + 1 == count;
        let connector = if last { "`--" } else { "|--" };
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        let file_type = entry.file_type().ok();
        let is_symlink = file_type.map(|t| t.is_symlink()).unwrap_or(false);
        let is_dir = file_type.map(|t| t.is_dir()).unwrap_or(false);

        if is_symlink {
            let target = std::fs::read_link(&path)
                .map(|t| t.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "?".to_string());
            state.lines.push(format!("{prefix}{connector} {name} -> {target}"));
            state.files += 1;
        } else if is_dir {
            state.lines.push(format!("{prefix}{connector} {name}/"));
            state.dirs += 1;
            if depth > 1 {
                let child_prefix = if last {
                    format!("{prefix}    ")
                } else {
                    format!("{prefix}|   ")
                };
                render_dir(&path, &child_prefix, depth - 1, state);
            }
        } else {
            state.lines.push(format!("{prefix}{connector} {name}"));
            state.files += 1;
        }
    }
}

fn plural(n: usize, singular: &str, plural: &str) -> String {
    if n == 1 {
        format!("{n} {singular}")
    } else {
        format!("{n} {plural}")
    }
}

#[async_trait::async_trait]
impl Tool for TreeTool {
    fn name(&self) -> &str {
        "tree"
    }

    fn description(&self) -> &str {
        "Render a directory tree. Set level to limit depth, all to include \
         dotfiles."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dirpath": {
                    "type": "string",
                    "description": "Directory to render"
                },
                "level": {
                    "type": "integer",
                    "description": "Maximum depth (default 3)"
                },
                "all": {
                    "type": "boolean",
                    "description": "Include dotfiles (default false)"
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
        let level = input
            .get("level")
            .and_then(Value::as_u64)
            .map(|l| l.max(1) as usize)
            .unwrap_or(DEFAULT_LEVEL);
        let all = input.get("all").and_then(Value::as_bool).unwrap_or(false);

        let (root, ws) = match require_workspace(&self.context, "tree") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let resolved = resolve_path(&root, dirpath);
        if !can_read_tree(&resolved.to_string_lossy(), &self.context.permissions, &ws) {
            return permission_denied("tree");
        }
        if !resolved.is_dir() {
            return err(format!("Not a directory: {dirpath}"));
        }

        let mut state = TreeState {
            lines: vec![format!("{dirpath}")],
            dirs: 0,
            files: 0,
            show_hidden: all,
        };
        render_dir(&resolved, "", level, &mut state);

        let summary = format!(
            "{}, {}",
            plural(state.dirs, "directory", "directories"),
            plural(state.files, "file", "files")
        );
        json!({
            "dirpath": dirpath,
            "tree": state.lines.join("\n"),
            "summary": summary,
            "directories": state.dirs,
            "files": state.files,
        })
    }
}
