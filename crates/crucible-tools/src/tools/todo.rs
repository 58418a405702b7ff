//! Todo tool family over the workspace store.
//!
//! Every call opens the store, performs one operation, and releases the
//! handle on return. Mutating replies carry the progress snapshot under
//! `todo` so the runner can fold it into the session context.

use super::{err, err_detail, permission_denied, require_workspace};
use crate::context::ToolExecutionContext;
use crate::registry::Tool;
use crucible_core::Error;
use crucible_policy::can_use_todo;
use crucible_todo::{EventActor, TodoProgressContext, TodoStatus, TodoStore};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TodoOp {
    List,
    Add,
    Update,
    Complete,
    Reopen,
    Remove,
    ClearDone,
}

impl TodoOp {
    fn tool_name(&self) -> &'static str {
        match self {
            Self::List => "todo_list",
            Self::Add => "todo_add",
            Self::Update => "todo_update",
            Self::Complete => "todo_complete",
            Self::Reopen => "todo_reopen",
            Self::Remove => "todo_remove",
            Self::ClearDone => "todo_clear_done",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::List => "List todo items ordered by id, optionally filtered by status.",
            Self::Add => "Add a todo item with a title and optional note.",
            Self::Update => "Update the title or note of a todo item.",
            Self::Complete => "Mark a todo item done.",
            Self::Reopen => "Reopen a done todo item.",
            Self::Remove => "Remove a todo item, returning its last snapshot.",
            Self::ClearDone => "Remove every done item, returning the deleted list.",
        }
    }

    fn schema(&self) -> Value {
        match self {
            Self::List => json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "enum": ["open", "done"]},
                    "limit": {"type": "integer"}
                },
                "required": [],
                "additionalProperties": false
            }),
            Self::Add => json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "note": {"type": "string"}
                },
                "required": ["title"],
                "additionalProperties": false
            }),
            Self::Update => json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "title": {"type": "string"},
                    "note": {"type": "string"}
                },
                "required": ["id"],
                "additionalProperties": false
            }),
            Self::Complete | Self::Reopen | Self::Remove => json!({
                "type": "object",
                "properties": {"id": {"type": "integer"}},
                "required": ["id"],
                "additionalProperties": false
            }),
            Self::ClearDone => json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": false
            }),
        }
    }
}

struct TodoTool {
    context: Arc<ToolExecutionContext>,
    op: TodoOp,
}

pub fn todo_tools(context: Arc<ToolExecutionContext>) -> Vec<Arc<dyn Tool>> {
    [
        TodoOp::List,
        TodoOp::Add,
        TodoOp::Update,
        TodoOp::Complete,
        TodoOp::Reopen,
        TodoOp::Remove,
        TodoOp::ClearDone,
    ]
    .into_iter()
    .map(|op| {
        Arc::new(TodoTool {
            context: context.clone(),
            op,
        }) as Arc<dyn Tool>
    })
    .collect()
}

fn progress_json(progress: &TodoProgressContext) -> Value {
    json!({
        "summary": progress.summary,
        "total": progress.total,
        "step": progress.step,
    })
}

fn store_failure(tool: &str, error: Error) -> Value {
    match error {
        Error::InvalidInput(detail) => err_detail("Invalid input", detail),
        other => err(format!("{tool}: {other}")),
    }
}

fn required_id(input: &Value) -> Result<i64, Value> {
    match input.get("id").and_then(Value::as_i64) {
        Some(id) if id >= 1 => Ok(id),
        _ => Err(err_detail("Invalid input", "id must be a positive integer")),
    }
}

impl TodoTool {
    fn open_store(&self) -> Result<(TodoStore, PathBuf), Value> {
        let (root, ws) = require_workspace(&self.context, "todo")?;
        if !can_use_todo(&root.to_string_lossy(), &self.context.permissions, &ws) {
            return Err(permission_denied("todo"));
        }
        match TodoStore::open(&root) {
            Ok(store) => Ok((store, root)),
            Err(e) => Err(err(format!("Failed to open todo store: {e}"))),
        }
    }
}

#[async_trait::async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        self.op.tool_name()
    }

    fn description(&self) -> &str {
        self.op.description()
    }

    fn input_schema(&self) -> Value {
        self.op.schema()
    }

    async fn execute(&self, input: Value) -> Value {
        let (mut store, _root) = match self.open_store() {
            Ok(v) => v,
            Err(e) => return e,
        };
        let tool = self.op.tool_name();
        let actor = EventActor::Agent;

        match self.op {
            TodoOp::List => {
                let status = input
                    .get("status")
                    .and_then(Value::as_str)
                    .and_then(TodoStatus::parse);
                let limit = input.get("limit").and_then(Value::as_u64).map(|l| l as u32);
                match (store.list(status, limit), store.progress()) {
                    (Ok(items), Ok(progress)) => json!({
                        "items": items,
                        "todo": progress_json(&progress),
                    }),
                    (Err(e), _) | (_, Err(e)) => store_failure(tool, e),
                }
            }
            TodoOp::Add => {
                let Some(title) = input.get("title").and_then(Value::as_str) else {
                    return err_detail("Invalid input", "missing required parameter: title");
                };
                let note = input.get("note").and_then(Value::as_str);
                match store.add(title, note, actor, Some(tool)) {
                    Ok(m) => json!({
                        "success": true,
                        "item": m.items[0],
                        "todo": progress_json(&m.progress),
                    }),
                    Err(e) => store_failure(tool, e),
                }
            }
            TodoOp::Update => {
                let id = match required_id(&input) {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                let title = input.get("title").and_then(Value::as_str);
                let note = input.get("note").and_then(Value::as_str);
                match store.update(id, title, note, actor, Some(tool)) {
                    Ok(m) => json!({
                        "success": true,
                        "item": m.items[0],
                        "todo": progress_json(&m.progress),
                    }),
                    Err(e) => store_failure(tool, e),
                }
            }
            TodoOp::Complete | TodoOp::Reopen => {
                let id = match required_id(&input) {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                let done = self.op == TodoOp::Complete;
                match store.set_done(id, done, actor, Some(tool)) {
                    Ok(m) => json!({
                        "success": true,
                        "item": m.items[0],
                        "todo": progress_json(&m.progress),
                    }),
                    Err(e) => store_failure(tool, e),
                }
            }
            TodoOp::Remove => {
                let id = match required_id(&input) {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                match store.remove(id, actor, Some(tool)) {
                    Ok(m) => json!({
                        "success": true,
                        "removed": m.items[0],
                        "todo": progress_json(&m.progress),
                    }),
                    Err(e) => store_failure(tool, e),
                }
            }
            TodoOp::ClearDone => match store.clear_done(actor, Some(tool)) {
                Ok(m) => json!({
                    "success": true,
                    "removedItems": m.items,
                    "todo": progress_json(&m.progress),
                }),
                Err(e) => store_failure(tool, e),
            },
        }
    }
}
