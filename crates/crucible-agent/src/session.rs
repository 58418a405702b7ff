//! Session state: message list, owned context, task lifecycle.

use crucible_core::{Message, Role, TaskStatus};
use crucible_memory::{
    compact_raw_for_storage, merge_context_with_memory_policy, project_context_snapshot_v2,
    sanitize_incoming_context_patch, AgentContext, ContextCodec, JsonContextCodec, LastTask,
    ActiveTaskMeta, PatchSource, ProjectionOptions, TaskCheckpoint,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub type ClockFn = Arc<dyn Fn() -> chrono::DateTime<chrono::Utc> + Send + Sync>;

const CONTEXT_OPEN_TAG: &str = "<context>";
const CONTEXT_CLOSE_TAG: &str = "</context>";

#[derive(Clone, Debug)]
pub struct TaskBegin {
    pub id: String,
    pub task_type: String,
    pub input: String,
    pub retries: u32,
    pub started_at: i64,
}

#[derive(Clone, Debug)]
pub struct TaskFinish {
    pub id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub finished_at: i64,
    pub retries: u32,
    pub attempts: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct FinishOptions {
    pub record_last_task: bool,
    pub preserve_checkpoint: bool,
}

impl Default for FinishOptions {
    fn default() -> Self {
        Self {
            record_last_task: true,
            preserve_checkpoint: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TurnOptions {
    pub projection: ProjectionOptions,
}

#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    pub context: AgentContext,
}

/// One conversation and its structured context. Not internally synchronized:
/// a session has a single driver and callers serialize task runs.
pub struct Session {
    workspace: String,
    lite_injection: bool,
    clock: ClockFn,
    codec: Arc<dyn ContextCodec>,
    system_prompt: String,
    messages: Vec<Message>,
    context: AgentContext,
}

fn with_trailing_separator(workspace: &str) -> String {
    if workspace.ends_with('/') {
        workspace.to_string()
    } else {
        format!("{workspace}/")
    }
}

impl Session {
    pub fn new(workspace: impl AsRef<str>, system_prompt: impl Into<String>) -> Self {
        Self::with_clock(workspace, system_prompt, Arc::new(chrono::Utc::now))
    }

    /// Injectable clock for deterministic tests.
    pub fn with_clock(
        workspace: impl AsRef<str>,
        system_prompt: impl Into<String>,
        clock: ClockFn,
    ) -> Self {
        let workspace = with_trailing_separator(workspace.as_ref());
        let now = clock();
        let system_prompt = system_prompt.into();
        let context = AgentContext::new(
            workspace.clone(),
            now.format("%Y-%m-%d %H:%M:%S").to_string(),
            now.timestamp_millis(),
        );
        Self {
            workspace,
            lite_injection: true,
            clock,
            codec: Arc::new(JsonContextCodec),
            system_prompt: system_prompt.clone(),
            messages: vec![Message::system(system_prompt)],
            context,
        }
    }

    pub fn set_lite_injection(&mut self, lite: bool) {
        self.lite_injection = lite;
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.messages.clone(),
            context: self.context.clone(),
        }
    }

    fn now_ms(&self) -> i64 {
        (self.clock)().timestamp_millis()
    }

    /// Sanitize, merge, and raw-compact a patch into the owned context.
    pub fn merge_extracted_context(&mut self, patch: &Value) {
        self.merge_context_from(patch, PatchSource::Model);
    }

    /// Same pipeline for system-originated patches (tool outputs, runner
    /// bookkeeping), which may also set todo progress fields.
    pub fn merge_system_context(&mut self, patch: &Value) {
        self.merge_context_from(patch, PatchSource::System);
    }

    fn merge_context_from(&mut self, patch: &Value, source: PatchSource) {
        let sanitized = sanitize_incoming_context_patch(patch, &self.context, source);
        let merged = merge_context_with_memory_policy(&self.context, &sanitized);
        self.context = compact_raw_for_storage(&merged);
    }

    /// Clear the todo cursor, e.g. after reconciliation found it stale.
    pub fn clear_todo_cursor(&mut self) {
        if let Some(todo) = self.context.todo.as_mut() {
            todo.cursor = None;
        }
    }

    /// Begin a task. A retry of the task named by the stored checkpoint
    /// restores the checkpointed working tier; any other begin starts from
    /// clean working and ephemeral tiers.
    pub fn begin_task_context(&mut self, begin: TaskBegin) {
        let restored = if begin.retries > 0 {
            match self.context.task_checkpoint.take() {
                Some(checkpoint) if checkpoint.task_id == begin.id => {
                    debug!(task = %begin.id, "restoring working memory from checkpoint");
                    self.context.memory.working = checkpoint.working_memory;
                    true
                }
                other => {
                    self.context.task_checkpoint = other;
                    false
                }
            }
        } else {
            false
        };
        if !restored {
            self.context.memory.working.clear();
        }
        self.context.memory.ephemeral.clear();

        self.context.active_task = Some(begin.input);
        self.context.active_task_meta = Some(ActiveTaskMeta {
            id: begin.id,
            task_type: begin.task_type,
            status: "running".to_string(),
            retries: begin.retries,
            attempt: begin.retries + 1,
            started_at: begin.started_at,
            execution: None,
        });
    }

    /// Finish a task. With `preserve_checkpoint` and a non-empty working
    /// tier the working memory is snapshotted for the retry of the same task
    /// id; otherwise the checkpoint is cleared.
    pub fn finish_task_context(&mut self, finish: TaskFinish, options: FinishOptions) {
        if options.preserve_checkpoint && !self.context.memory.working.is_empty() {
            self.context.task_checkpoint = Some(TaskCheckpoint {
                task_id: finish.id.clone(),
                task_type: finish.task_type.clone(),
                saved_at: finish.finished_at,
                retries: finish.retries,
                attempts: finish.attempts,
                working_memory: self.context.memory.working.clone(),
            });
        } else {
            self.context.task_checkpoint = None;
        }

        self.context.active_task = None;
        self.context.active_task_meta = None;

        if options.record_last_task {
            self.context.last_task = Some(LastTask {
                id: finish.id,
                task_type: finish.task_type,
                status: finish.status.as_str().to_string(),
                finished_at: finish.finished_at,
                retries: finish.retries,
                attempts: finish.attempts,
            });
        }

        self.context.memory.working.clear();
        self.context.memory.ephemeral.clear();
    }

    fn refresh_runtime(&mut self, advance_round: bool) {
        if advance_round {
            self.context.runtime.round += 1;
        }
        self.context.runtime.datetime = (self.clock)().format("%Y-%m-%d %H:%M:%S").to_string();
    }

    fn rebuild_injected_message(&mut self, options: &TurnOptions) {
        let snapshot = project_context_snapshot_v2(&self.context, &options.projection);
        self.context = snapshot.raw;

        let payload = if self.lite_injection {
            self.codec.encode(&snapshot.model_context)
        } else {
            serde_json::to_string(&snapshot.injected).unwrap_or_else(|_| "{}".to_string())
        };
        let content = format!("{CONTEXT_OPEN_TAG}\n{payload}\n{CONTEXT_CLOSE_TAG}");

        match self.messages.first_mut() {
            Some(first)
                if first.role == Role::System && first.content.starts_with(CONTEXT_OPEN_TAG) =>
            {
                first.content = content;
            }
            Some(first) if first.role == Role::System => {
                self.messages.insert(0, Message::system(content));
            }
            _ => {
                // A session always carries its fixed system prompt; recover
                // the expected head shape if it went missing.
                self.messages.insert(0, Message::system(self.system_prompt.clone()));
                self.messages.insert(0, Message::system(content));
            }
        }
    }

    /// Refresh runtime, rebuild the injected context message, and append a
    /// user turn.
    pub fn prepare_user_turn(&mut self, text: &str, options: &TurnOptions) {
        self.refresh_runtime(true);
        self.rebuild_injected_message(options);
        self.messages.push(Message::user(text));
    }

    /// Internal continuation: same rebuild, but the round does not advance.
    pub fn prepare_internal_continuation_turn(&mut self, text: &str, options: &TurnOptions) {
        self.refresh_runtime(false);
        self.rebuild_injected_message(options);
        self.messages.push(Message::user(text));
    }

    /// Update the newest user message in place; false when none exists.
    pub fn replace_latest_user_turn(&mut self, text: &str) -> bool {
        for message in self.messages.iter_mut().rev() {
            if message.role == Role::User {
                message.content = text.to_string();
                return true;
            }
        }
        false
    }

    pub fn push_assistant_message(&mut self, text: &str) {
        self.messages.push(Message::assistant(text));
    }

    /// Runtime-only diagnostics; memory and round are untouched.
    pub fn update_runtime_diagnostics(&mut self, budget: Option<Value>, token_usage: Option<Value>) {
        if let Some(budget) = budget {
            self.context.runtime.budget = Some(budget);
        }
        if let Some(token_usage) = token_usage {
            self.context.runtime.token_usage = Some(token_usage);
        }
    }

    /// Epoch-ms timestamp from the session clock.
    pub fn timestamp_ms(&self) -> i64 {
        self.now_ms()
    }
}
