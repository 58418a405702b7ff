//! The on-wire whitelist projection of the context.

use crate::context::{AgentContext, MemoryTiers, TodoCursor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModelRuntime {
    pub round: u64,
    pub workspace: String,
    pub datetime: String,
    pub startup_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModelTodo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<TodoCursor>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelTaskMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<Value>,
}

/// Exactly the fields the model is allowed to see. Runtime diagnostics
/// (`token_usage`, `budget`) and projection-only fields never appear here.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModelContextV2 {
    pub version: u64,
    pub runtime: ModelRuntime,
    pub memory: MemoryTiers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo: Option<ModelTodo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task_meta: Option<ModelTaskMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
}

pub fn to_model_context_v2(context: &AgentContext) -> ModelContextV2 {
    ModelContextV2 {
        version: context.version,
        runtime: ModelRuntime {
            round: context.runtime.round,
            workspace: context.runtime.workspace.clone(),
            datetime: context.runtime.datetime.clone(),
            startup_at: context.runtime.startup_at,
        },
        memory: context.memory.clone(),
        todo: context.todo.as_ref().map(|t| ModelTodo {
            summary: t.summary.clone(),
            total: t.total,
            step: t.step,
            cursor: t.cursor.clone(),
        }),
        active_task: context.active_task.clone(),
        active_task_meta: context.active_task_meta.as_ref().map(|m| ModelTaskMeta {
            id: Some(m.id.clone()),
            task_type: Some(m.task_type.clone()),
            status: Some(m.status.clone()),
            retries: Some(m.retries),
            attempt: Some(m.attempt),
            execution: m.execution.clone(),
        }),
        capabilities: context.capabilities.clone(),
    }
}
