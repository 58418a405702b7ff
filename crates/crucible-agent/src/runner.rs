//! The task runner: segment loop, outcome classification, hooks.

use crate::config::AgentExecutionConfig;
use crate::hooks::{PersistentMemoryHooks, TaskHookOutcome};
use crate::middleware::ExtractContextMiddleware;
use crate::session::{FinishOptions, Session, TaskBegin, TaskFinish, TurnOptions};
use crucible_core::TaskStatus;
use crucible_llm::{FinishReason, GenerateOutcome, GenerateRequest, ModelExecutor};
use crucible_memory::{TodoCursor, TodoCursorNext};
use crucible_todo::{TodoItem, TodoStatus, TodoStore};
use crucible_tools::context::{ToolBudget, ToolExecutionContext};
use crucible_tools::ToolRegistry;
use futures::StreamExt;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CONTINUATION_PROMPT: &str =
    "Continue the current task from where the previous segment stopped. \
     Do not repeat completed work; pick up the remaining steps.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    ModelStepBudgetExhausted,
    ContinuationLimitReached,
    StepLimitSegmentContinue,
    ToolBudgetExhausted,
    Cancelled,
    ModelError,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModelStepBudgetExhausted => "model_step_budget_exhausted",
            Self::ContinuationLimitReached => "continuation_limit_reached",
            Self::StepLimitSegmentContinue => "step_limit_segment_continue",
            Self::ToolBudgetExhausted => "tool_budget_exhausted",
            Self::Cancelled => "cancelled",
            Self::ModelError => "model_error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentOutcome {
    AutoContinue,
    Stop { stop_reason: StopReason },
    Completed,
}

#[derive(Clone, Debug)]
pub struct ClassifyInput {
    pub finish_reason: FinishReason,
    pub segment_step_count: u32,
    pub total_model_steps: u32,
    pub continuation_runs: u32,
}

/// The segment decision table, in priority order: task-wide step cap, then
/// auto-continue, then continuation exhaustion, then completion.
pub fn classify_segment_outcome(
    input: &ClassifyInput,
    config: &AgentExecutionConfig,
) -> SegmentOutcome {
    if input.total_model_steps >= config.max_model_steps_per_task {
        return SegmentOutcome::Stop {
            stop_reason: StopReason::ModelStepBudgetExhausted,
        };
    }

    let segment_limited = input.finish_reason == FinishReason::Length
        && input.segment_step_count >= config.max_model_steps_per_run;
    if segment_limited {
        if config.auto_continue_on_step_limit
            && input.continuation_runs < config.max_continuation_runs
        {
            return SegmentOutcome::AutoContinue;
        }
        let stop_reason = if config.auto_continue_on_step_limit {
            StopReason::ContinuationLimitReached
        } else {
            StopReason::StepLimitSegmentContinue
        };
        return SegmentOutcome::Stop { stop_reason };
    }

    SegmentOutcome::Completed
}

#[derive(Clone, Debug, Default)]
pub struct TaskMeta {
    pub id: Option<String>,
    pub task_type: Option<String>,
    pub retries: u32,
    /// Opaque metadata passed through to the before-task hook.
    pub raw: Option<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskRunResult {
    pub completed: bool,
    pub text: String,
    pub finish_reason: Option<String>,
    pub stop_reason: Option<String>,
}

pub type RegistryFactory = Arc<dyn Fn(Arc<ToolExecutionContext>) -> ToolRegistry + Send + Sync>;

pub struct RunnerDependencies {
    pub model_executor: Arc<dyn ModelExecutor>,
    pub create_tool_registry: RegistryFactory,
    pub extract_context: Arc<dyn ExtractContextMiddleware>,
    pub execution_config: AgentExecutionConfig,
    pub memory_hooks: Arc<dyn PersistentMemoryHooks>,
}

impl RunnerDependencies {
    pub fn new(model_executor: Arc<dyn ModelExecutor>) -> Self {
        Self {
            model_executor,
            create_tool_registry: Arc::new(crucible_tools::create_builtin_registry),
            extract_context: Arc::new(crate::middleware::FencedContextPatchExtractor),
            execution_config: AgentExecutionConfig::default(),
            memory_hooks: Arc::new(crate::hooks::NoopMemoryHooks),
        }
    }
}

pub struct Runner {
    model: String,
    deps: RunnerDependencies,
}

type TodoProgressSink = Arc<Mutex<Option<Value>>>;

impl Runner {
    pub fn new(model: impl Into<String>, deps: RunnerDependencies) -> Self {
        Self {
            model: model.into(),
            deps,
        }
    }

    pub fn config(&self) -> &AgentExecutionConfig {
        &self.deps.execution_config
    }

    fn build_registry(&self, session: &Session) -> (ToolRegistry, TodoProgressSink) {
        let sink: TodoProgressSink = Arc::new(Mutex::new(None));
        let hook_sink = sink.clone();

        let mut context = ToolExecutionContext::for_workspace(session.workspace());
        context.tool_budget = self
            .deps
            .execution_config
            .tool_budget
            .clone()
            .map(ToolBudget::new);
        context.on_tool_execution_settled = Some(Arc::new(move |settled| {
            if let Some(progress) = todo_progress_from_tool_output(&settled.result) {
                *hook_sink.lock().expect("todo sink lock") = Some(progress);
            }
            Ok(())
        }));

        ((self.deps.create_tool_registry)(Arc::new(context)), sink)
    }

    async fn settle(
        &self,
        session: &mut Session,
        finish: TaskFinish,
        options: FinishOptions,
        result: TaskRunResult,
        mode: &'static str,
    ) -> TaskRunResult {
        session.finish_task_context(finish, options);
        let outcome = TaskHookOutcome {
            completed: result.completed,
            mode,
            finish_reason: result.finish_reason.clone(),
            stop_reason: result.stop_reason.clone(),
        };
        if let Err(e) = self.deps.memory_hooks.after_task(session, &outcome).await {
            warn!("afterTask hook failed: {e}");
        }
        result
    }

    fn fold_todo_progress(&self, session: &mut Session, sink: &TodoProgressSink) {
        let progress = sink.lock().expect("todo sink lock").take();
        if let Some(progress) = progress {
            session.merge_system_context(&json!({ "todo": progress }));
        }

        let Some(cursor) = session
            .context()
            .todo
            .as_ref()
            .and_then(|t| t.cursor.clone())
        else {
            return;
        };
        let workspace = PathBuf::from(session.workspace());
        if !workspace.join(".agent").join("todo.db").exists() {
            return;
        }
        let Ok(store) = TodoStore::open(&workspace) else {
            return;
        };
        let Ok(items) = store.list(None, None) else {
            return;
        };
        if let CursorReconciliation::Clear { reason } = reconcile_todo_cursor(&cursor, &items) {
            debug!(reason, "clearing stale todo cursor");
            session.clear_todo_cursor();
        }
    }

    /// Run a task to a terminal state, returning the final segment's text.
    pub async fn run_task_detailed(
        &self,
        session: &mut Session,
        input: &str,
        meta: Option<TaskMeta>,
    ) -> TaskRunResult {
        self.run_task_cancellable(session, input, meta, CancellationToken::new())
            .await
    }

    pub async fn run_task_cancellable(
        &self,
        session: &mut Session,
        input: &str,
        meta: Option<TaskMeta>,
        cancel: CancellationToken,
    ) -> TaskRunResult {
        self.run_task_inner(session, input, meta, cancel, None).await
    }

    /// Streaming variant: text deltas are forwarded through `delta_tx` while
    /// the task runs; the returned result matches the detailed shape.
    pub async fn run_task_stream(
        &self,
        session: &mut Session,
        input: &str,
        meta: Option<TaskMeta>,
        delta_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> TaskRunResult {
        self.run_task_inner(session, input, meta, cancel, Some(delta_tx))
            .await
    }

    async fn run_task_inner(
        &self,
        session: &mut Session,
        input: &str,
        meta: Option<TaskMeta>,
        cancel: CancellationToken,
        delta_tx: Option<mpsc::Sender<String>>,
    ) -> TaskRunResult {
        let mode: &'static str = if delta_tx.is_some() { "stream" } else { "detailed" };
        let meta = meta.unwrap_or_default();
        let task_id = meta
            .id
            .unwrap_or_else(|| format!("task-{}", session.timestamp_ms()));
        let task_type = meta.task_type.unwrap_or_else(|| "chat".to_string());
        let retries = meta.retries;
        let attempts = retries + 1;

        if let Err(e) = self
            .deps
            .memory_hooks
            .before_task(session, meta.raw.as_ref())
            .await
        {
            warn!("beforeTask hook failed: {e}");
        }

        session.begin_task_context(TaskBegin {
            id: task_id.clone(),
            task_type: task_type.clone(),
            input: input.to_string(),
            retries,
            started_at: session.timestamp_ms(),
        });

        let (registry, todo_sink) = self.build_registry(session);
        let config = &self.deps.execution_config;

        let mut total_model_steps: u32 = 0;
        let mut continuation_runs: u32 = 0;
        let mut first_segment = true;
        let mut last_text = String::new();
        let mut input_tokens: u64 = 0;
        let mut output_tokens: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                let finish = self.finish_record(session, &task_id, &task_type, TaskStatus::Cancelled, retries, attempts);
                return self
                    .settle(
                        session,
                        finish,
                        FinishOptions {
                            record_last_task: true,
                            preserve_checkpoint: true,
                        },
                        TaskRunResult {
                            completed: false,
                            text: last_text,
                            finish_reason: None,
                            stop_reason: Some(StopReason::Cancelled.as_str().to_string()),
                        },
                        mode,
                    )
                    .await;
            }

            if first_segment {
                session.prepare_user_turn(input, &TurnOptions::default());
                first_segment = false;
            } else {
                session.prepare_internal_continuation_turn(CONTINUATION_PROMPT, &TurnOptions::default());
            }

            let request = GenerateRequest {
                model: self.model.clone(),
                messages: session.messages().to_vec(),
                tools: registry.specs(),
                max_steps: config.max_model_steps_per_run,
            };

            let outcome = match self
                .run_segment(request, cancel.clone(), delta_tx.as_ref())
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    // A cancel fired mid-segment surfaces as an executor
                    // error; it ends the task as cancelled, not failed.
                    if cancel.is_cancelled() || matches!(e, crucible_core::Error::Cancelled) {
                        let finish = self.finish_record(session, &task_id, &task_type, TaskStatus::Cancelled, retries, attempts);
                        return self
                            .settle(
                                session,
                                finish,
                                FinishOptions {
                                    record_last_task: true,
                                    preserve_checkpoint: true,
                                },
                                TaskRunResult {
                                    completed: false,
                                    text: last_text,
                                    finish_reason: None,
                                    stop_reason: Some(StopReason::Cancelled.as_str().to_string()),
                                },
                                mode,
                            )
                            .await;
                    }
                    let stop_reason = if e.is_budget_exceeded() {
                        StopReason::ToolBudgetExhausted
                    } else {
                        StopReason::ModelError
                    };
                    let finish = self.finish_record(session, &task_id, &task_type, TaskStatus::Failed, retries, attempts);
                    return self
                        .settle(
                            session,
                            finish,
                            FinishOptions::default(),
                            TaskRunResult {
                                completed: false,
                                text: e.to_string(),
                                finish_reason: None,
                                stop_reason: Some(stop_reason.as_str().to_string()),
                            },
                            mode,
                        )
                        .await;
                }
            };

            total_model_steps += outcome.step_count;
            if outcome.finish_reason == FinishReason::Length {
                continuation_runs += 1;
            }
            if let Some(usage) = outcome.usage {
                input_tokens += usage.input_tokens;
                output_tokens += usage.output_tokens;
                session.update_runtime_diagnostics(
                    None,
                    Some(json!({
                        "input_tokens": input_tokens,
                        "output_tokens": output_tokens,
                        "total_tokens": input_tokens + output_tokens,
                    })),
                );
            }

            session.push_assistant_message(&outcome.text);
            for patch in self.deps.extract_context.extract(&outcome.text) {
                session.merge_extracted_context(&patch);
            }
            self.fold_todo_progress(session, &todo_sink);
            last_text = outcome.text.clone();

            let classified = classify_segment_outcome(
                &ClassifyInput {
                    finish_reason: outcome.finish_reason.clone(),
                    segment_step_count: outcome.step_count,
                    total_model_steps,
                    continuation_runs,
                },
                config,
            );
            debug!(
                total_model_steps,
                continuation_runs,
                outcome = ?classified,
                "segment classified"
            );

            match classified {
                SegmentOutcome::AutoContinue => continue,
                SegmentOutcome::Completed => {
                    let finish = self.finish_record(session, &task_id, &task_type, TaskStatus::Success, retries, attempts);
                    return self
                        .settle(
                            session,
                            finish,
                            FinishOptions::default(),
                            TaskRunResult {
                                completed: true,
                                text: outcome.text,
                                finish_reason: Some(outcome.finish_reason.as_str().to_string()),
                                stop_reason: None,
                            },
                            mode,
                        )
                        .await;
                }
                SegmentOutcome::Stop { stop_reason } => {
                    // Only per-run step exhaustion leaves a retry checkpoint
                    // behind; hitting the task-wide step cap is terminal.
                    let options = match stop_reason {
                        StopReason::ContinuationLimitReached
                        | StopReason::StepLimitSegmentContinue => FinishOptions {
                            record_last_task: false,
                            preserve_checkpoint: true,
                        },
                        _ => FinishOptions::default(),
                    };
                    let finish = self.finish_record(session, &task_id, &task_type, TaskStatus::Failed, retries, attempts);
                    return self
                        .settle(
                            session,
                            finish,
                            options,
                            TaskRunResult {
                                completed: false,
                                text: outcome.text,
                                finish_reason: Some(outcome.finish_reason.as_str().to_string()),
                                stop_reason: Some(stop_reason.as_str().to_string()),
                            },
                            mode,
                        )
                        .await;
                }
            }
        }
    }

    fn finish_record(
        &self,
        session: &Session,
        id: &str,
        task_type: &str,
        status: TaskStatus,
        retries: u32,
        attempts: u32,
    ) -> TaskFinish {
        TaskFinish {
            id: id.to_string(),
            task_type: task_type.to_string(),
            status,
            finished_at: session.timestamp_ms(),
            retries,
            attempts,
        }
    }

    async fn run_segment(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
        delta_tx: Option<&mpsc::Sender<String>>,
    ) -> crucible_core::Result<GenerateOutcome> {
        match delta_tx {
            None => self.deps.model_executor.generate(request, cancel).await,
            Some(delta_tx) => {
                let handle = self.deps.model_executor.stream(request, cancel).await?;
                let mut stream = handle.text_stream;
                while let Some(chunk) = stream.next().await {
                    if delta_tx.send(chunk).await.is_err() {
                        // Receiver dropped; keep consuming so the tail
                        // future resolves.
                        break;
                    }
                }
                while stream.next().await.is_some() {}
                handle.final_result.await
            }
        }
    }
}

/// The progress sub-record todo-mutating tools attach to their reply.
pub fn todo_progress_from_tool_output(result: &Value) -> Option<Value> {
    let todo = result.get("todo")?;
    let object = todo.as_object()?;
    if object.contains_key("summary") && object.contains_key("total") && object.contains_key("step")
    {
        Some(todo.clone())
    } else {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CursorReconciliation {
    Keep,
    Clear { reason: &'static str },
}

/// Check a todo cursor against the current item list: keep it while its
/// target is still addressable, clear it when the target vanished or the
/// indicated completion already happened.
pub fn reconcile_todo_cursor(cursor: &TodoCursor, items: &[TodoItem]) -> CursorReconciliation {
    let Some(target) = cursor.target_id else {
        return CursorReconciliation::Keep;
    };
    let Some(item) = items.iter().find(|i| i.id >= 1 && i.id as u64 == target) else {
        return CursorReconciliation::Clear {
            reason: "target_missing",
        };
    };
    if cursor.next == TodoCursorNext::TodoComplete && item.status == TodoStatus::Done {
        return CursorReconciliation::Clear {
            reason: "consumed_complete",
        };
    }
    CursorReconciliation::Keep
}
