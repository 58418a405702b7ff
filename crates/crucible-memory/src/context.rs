//! The session's structured context record.

use crate::block::MemoryBlock;
use crate::policy::Tier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Numeric context policy version. System-managed; never patched from model
/// output.
pub const CONTEXT_POLICY_VERSION: u64 = 3;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RuntimeState {
    pub round: u64,
    pub workspace: String,
    pub datetime: String,
    pub startup_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryTiers {
    #[serde(default)]
    pub core: Vec<MemoryBlock>,
    #[serde(default)]
    pub working: Vec<MemoryBlock>,
    #[serde(default)]
    pub ephemeral: Vec<MemoryBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longterm: Option<Vec<MemoryBlock>>,
}

impl MemoryTiers {
    pub fn get(&self, tier: Tier) -> &[MemoryBlock] {
        match tier {
            Tier::Core => &self.core,
            Tier::Working => &self.working,
            Tier::Ephemeral => &self.ephemeral,
            Tier::Longterm => self.longterm.as_deref().unwrap_or(&[]),
        }
    }

    pub fn get_mut(&mut self, tier: Tier) -> &mut Vec<MemoryBlock> {
        match tier {
            Tier::Core => &mut self.core,
            Tier::Working => &mut self.working,
            Tier::Ephemeral => &mut self.ephemeral,
            Tier::Longterm => self.longterm.get_or_insert_with(Vec::new),
        }
    }

    /// Present tiers, in the fixed core/working/ephemeral/longterm order.
    pub fn present_tiers(&self) -> Vec<Tier> {
        let mut tiers = vec![Tier::Core, Tier::Working, Tier::Ephemeral];
        if self.longterm.is_some() {
            tiers.push(Tier::Longterm);
        }
        tiers
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActiveTaskMeta {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: String,
    pub retries: u32,
    pub attempt: u32,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LastTask {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: String,
    pub finished_at: i64,
    pub retries: u32,
    pub attempts: u32,
}

/// Working-memory snapshot carried across a retry boundary for one task id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskCheckpoint {
    pub task_id: String,
    pub task_type: String,
    pub saved_at: i64,
    pub retries: u32,
    pub attempts: u32,
    pub working_memory: Vec<MemoryBlock>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TodoCursorPhase {
    Planning,
    Doing,
    Verifying,
    Blocked,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoCursorNext {
    None,
    TodoList,
    TodoAdd,
    TodoClearDone,
    TodoComplete,
    TodoReopen,
    TodoUpdate,
    TodoRemove,
}

impl TodoCursorNext {
    /// Next-actions that address one specific item and so require a target id.
    pub fn requires_target(&self) -> bool {
        matches!(
            self,
            Self::TodoComplete | Self::TodoReopen | Self::TodoUpdate | Self::TodoRemove
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TodoCursor {
    pub v: u32,
    pub phase: TodoCursorPhase,
    pub next: TodoCursorNext,
    #[serde(rename = "targetId")]
    pub target_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TodoProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<TodoCursor>,
}

/// The session's structured state. One per session, owned by the session
/// from construction to teardown.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentContext {
    pub version: u64,
    pub runtime: RuntimeState,
    #[serde(default)]
    pub memory: MemoryTiers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task_meta: Option<ActiveTaskMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_task: Option<LastTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_checkpoint: Option<TaskCheckpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo: Option<TodoProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AgentContext {
    pub fn new(workspace: impl Into<String>, datetime: impl Into<String>, startup_at: i64) -> Self {
        Self {
            version: CONTEXT_POLICY_VERSION,
            runtime: RuntimeState {
                round: 1,
                workspace: workspace.into(),
                datetime: datetime.into(),
                startup_at,
                token_usage: None,
                budget: None,
            },
            memory: MemoryTiers::default(),
            active_task: None,
            active_task_meta: None,
            last_task: None,
            task_checkpoint: None,
            todo: None,
            project: None,
            capabilities: None,
            extra: BTreeMap::new(),
        }
    }
}
