//! Tests for crucible-agent: session lifecycle, runner scenarios, and the
//! segment classification table.

use crucible_agent::*;
use crucible_core::{Result, Role, TaskStatus};
use crucible_llm::{
    FinishReason, GenerateOutcome, GenerateRequest, ModelExecutor, StreamHandle, TokenUsage,
};
use crucible_memory::{TodoCursor, TodoCursorNext, TodoCursorPhase};
use crucible_todo::{TodoItem, TodoStatus};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

fn outcome(text: &str, finish_reason: FinishReason, step_count: u32) -> GenerateOutcome {
    GenerateOutcome {
        text: text.to_string(),
        finish_reason,
        step_count,
        usage: None,
    }
}

fn outcome_with_usage(
    text: &str,
    finish_reason: FinishReason,
    step_count: u32,
    input_tokens: u64,
    output_tokens: u64,
) -> GenerateOutcome {
    GenerateOutcome {
        usage: Some(TokenUsage {
            input_tokens,
            output_tokens,
        }),
        ..outcome(text, finish_reason, step_count)
    }
}

/// Executor returning a fixed script of segment outcomes.
struct ScriptedExecutor {
    script: Mutex<VecDeque<GenerateOutcome>>,
    calls: AtomicU32,
}

impl ScriptedExecutor {
    fn new(outcomes: Vec<GenerateOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl ModelExecutor for ScriptedExecutor {
    async fn generate(
        &self,
        _request: GenerateRequest,
        _cancel: CancellationToken,
    ) -> Result<GenerateOutcome> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| crucible_core::Error::ModelError("script exhausted".into()))
    }

    async fn stream(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<StreamHandle> {
        let outcome = self.generate(request, cancel).await?;
        let chunks: Vec<String> = outcome.text.chars().map(|c| c.to_string()).collect();
        let text_stream = Box::pin(tokio_stream::iter(chunks));
        Ok(StreamHandle {
            text_stream,
            final_result: Box::pin(async move { Ok(outcome) }),
        })
    }
}

#[derive(Default)]
struct RecordingHooks {
    before: AtomicU32,
    after: Mutex<Vec<TaskHookOutcome>>,
}

#[async_trait::async_trait]
impl PersistentMemoryHooks for RecordingHooks {
    async fn before_task(
        &self,
        _session: &mut Session,
        _meta: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.before.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn after_task(&self, _session: &mut Session, outcome: &TaskHookOutcome) -> Result<()> {
        self.after.lock().unwrap().push(outcome.clone());
        Ok(())
    }
}

fn runner_with(
    executor: Arc<ScriptedExecutor>,
    hooks: Arc<RecordingHooks>,
    config: AgentExecutionConfig,
) -> Runner {
    let mut deps = RunnerDependencies::new(executor);
    deps.execution_config = config;
    deps.memory_hooks = hooks;
    Runner::new("test-model", deps)
}

// ===========================================================================
// Scenario S1: fresh task, success
// ===========================================================================

#[tokio::test]
async fn fresh_task_success() {
    let executor = ScriptedExecutor::new(vec![outcome("done", FinishReason::Stop, 1)]);
    let hooks = Arc::new(RecordingHooks::default());
    let runner = runner_with(executor.clone(), hooks.clone(), AgentExecutionConfig::default());
    let mut session = Session::new("/tmp/ws", "sys");

    let result = runner.run_task_detailed(&mut session, "hello", None).await;

    assert!(result.completed);
    assert_eq!(result.text, "done");
    assert_eq!(result.finish_reason.as_deref(), Some("stop"));
    assert!(session.context().active_task.is_none());
    assert_eq!(
        session.context().last_task.as_ref().unwrap().status,
        "success"
    );
    assert_eq!(executor.calls(), 1);
}

// ===========================================================================
// Scenario S2: auto-continue then completion
// ===========================================================================

#[tokio::test]
async fn auto_continue_then_completion() {
    let executor = ScriptedExecutor::new(vec![
        outcome("partial", FinishReason::Length, 2),
        outcome("done", FinishReason::Stop, 1),
    ]);
    let hooks = Arc::new(RecordingHooks::default());
    let config = AgentExecutionConfig {
        max_model_steps_per_run: 2,
        max_continuation_runs: 3,
        max_model_steps_per_task: 10,
        ..Default::default()
    };
    let runner = runner_with(executor.clone(), hooks.clone(), config);
    let mut session = Session::new("/tmp/ws", "sys");

    let result = runner.run_task_detailed(&mut session, "go", None).await;

    assert!(result.completed);
    assert_eq!(result.text, "done");
    assert_eq!(executor.calls(), 2);
    assert_eq!(hooks.before.load(Ordering::Acquire), 1);

    let after = hooks.after.lock().unwrap();
    assert_eq!(after.len(), 1);
    assert!(after[0].completed);
    assert_eq!(after[0].mode, "detailed");
    assert_eq!(after[0].finish_reason.as_deref(), Some("stop"));
}

// ===========================================================================
// Scenarios S3/S4 and the classification table
// ===========================================================================

#[test]
fn classification_continuation_budget_exhaustion() {
    let config = AgentExecutionConfig {
        max_model_steps_per_run: 10,
        auto_continue_on_step_limit: true,
        max_continuation_runs: 1,
        ..Default::default()
    };
    let outcome = classify_segment_outcome(
        &ClassifyInput {
            finish_reason: FinishReason::Length,
            segment_step_count: 10,
            total_model_steps: 20,
            continuation_runs: 1,
        },
        &config,
    );
    assert_eq!(
        outcome,
        SegmentOutcome::Stop {
            stop_reason: StopReason::ContinuationLimitReached
        }
    );
}

#[test]
fn classification_total_step_cap_has_priority() {
    let config = AgentExecutionConfig {
        max_model_steps_per_task: 20,
        max_model_steps_per_run: 10,
        ..Default::default()
    };
    let outcome = classify_segment_outcome(
        &ClassifyInput {
            finish_reason: FinishReason::Stop,
            segment_step_count: 1,
            total_model_steps: 20,
            continuation_runs: 0,
        },
        &config,
    );
    assert_eq!(
        outcome,
        SegmentOutcome::Stop {
            stop_reason: StopReason::ModelStepBudgetExhausted
        }
    );
}

#[test]
fn classification_auto_continue_and_disabled_auto_continue() {
    let config = AgentExecutionConfig {
        max_model_steps_per_run: 5,
        auto_continue_on_step_limit: true,
        max_continuation_runs: 3,
        ..Default::default()
    };
    let auto = classify_segment_outcome(
        &ClassifyInput {
            finish_reason: FinishReason::Length,
            segment_step_count: 5,
            total_model_steps: 5,
            continuation_runs: 1,
        },
        &config,
    );
    assert_eq!(auto, SegmentOutcome::AutoContinue);

    let disabled = AgentExecutionConfig {
        auto_continue_on_step_limit: false,
        max_model_steps_per_run: 5,
        ..Default::default()
    };
    let stopped = classify_segment_outcome(
        &ClassifyInput {
            finish_reason: FinishReason::Length,
            segment_step_count: 5,
            total_model_steps: 5,
            continuation_runs: 1,
        },
        &disabled,
    );
    assert_eq!(
        stopped,
        SegmentOutcome::Stop {
            stop_reason: StopReason::StepLimitSegmentContinue
        }
    );

    // A short segment that merely reports "length" without hitting the
    // per-run limit completes.
    let short = classify_segment_outcome(
        &ClassifyInput {
            finish_reason: FinishReason::Length,
            segment_step_count: 2,
            total_model_steps: 2,
            continuation_runs: 1,
        },
        &config,
    );
    assert_eq!(short, SegmentOutcome::Completed);
}

// ===========================================================================
// Scenario S5: context dedup + merge through the session
// ===========================================================================

#[test]
fn context_dedup_and_merge() {
    let mut session = Session::new("/tmp/ws", "sys");

    session.merge_extracted_context(&json!({"memory": {"working": [
        {"id": "task-1", "type": "note", "decay": 0.4, "confidence": 0.8, "round": 1, "content": "first"},
    ]}}));
    session.merge_extracted_context(&json!({"memory": {"working": [
        {"id": "task-1", "type": "note", "decay": 0.3, "confidence": 0.95, "round": 2, "content": "second"},
    ]}}));

    let working = &session.context().memory.working;
    assert_eq!(working.len(), 1);
    assert_eq!(working[0].content, "second");
    assert_eq!(working[0].round, session.context().runtime.round);
}

// ===========================================================================
// Scenario S6: retry checkpoint round-trip
// ===========================================================================

#[test]
fn retry_checkpoint_round_trip() {
    let mut session = Session::new("/tmp/ws", "sys");
    let started = session.timestamp_ms();

    session.begin_task_context(TaskBegin {
        id: "t".into(),
        task_type: "chat".into(),
        input: "first attempt".into(),
        retries: 0,
        started_at: started,
    });
    session.merge_extracted_context(&json!({"memory": {"working": [
        {"id": "w1", "type": "note", "decay": 0.1, "confidence": 0.9, "content": "keep me"},
    ]}}));

    session.finish_task_context(
        TaskFinish {
            id: "t".into(),
            task_type: "chat".into(),
            status: TaskStatus::Failed,
            finished_at: session.timestamp_ms(),
            retries: 1,
            attempts: 1,
        },
        FinishOptions {
            record_last_task: false,
            preserve_checkpoint: true,
        },
    );

    let checkpoint = session.context().task_checkpoint.as_ref().unwrap();
    assert_eq!(checkpoint.task_id, "t");
    assert_eq!(checkpoint.working_memory.len(), 1);
    assert!(session.context().memory.working.is_empty());
    assert!(session.context().last_task.is_none());

    session.begin_task_context(TaskBegin {
        id: "t".into(),
        task_type: "chat".into(),
        input: "second attempt".into(),
        retries: 1,
        started_at: session.timestamp_ms(),
    });

    assert_eq!(session.context().memory.working.len(), 1);
    assert_eq!(session.context().memory.working[0].id, "w1");
    assert_eq!(session.context().active_task.as_deref(), Some("second attempt"));
    assert!(session.context().task_checkpoint.is_none());

    // Terminal finish leaves no checkpoint behind.
    session.finish_task_context(
        TaskFinish {
            id: "t".into(),
            task_type: "chat".into(),
            status: TaskStatus::Success,
            finished_at: session.timestamp_ms(),
            retries: 1,
            attempts: 2,
        },
        FinishOptions::default(),
    );
    assert!(session.context().task_checkpoint.is_none());
    assert_eq!(session.context().last_task.as_ref().unwrap().status, "success");
}

#[test]
fn begin_for_other_task_clears_working_and_keeps_checkpoint_for_nobody() {
    let mut session = Session::new("/tmp/ws", "sys");
    session.begin_task_context(TaskBegin {
        id: "a".into(),
        task_type: "chat".into(),
        input: "x".into(),
        retries: 0,
        started_at: 0,
    });
    session.merge_extracted_context(&json!({"memory": {"working": [
        {"id": "w", "type": "note", "decay": 0.1, "confidence": 0.9, "content": "c"},
    ]}}));
    session.finish_task_context(
        TaskFinish {
            id: "a".into(),
            task_type: "chat".into(),
            status: TaskStatus::Failed,
            finished_at: 0,
            retries: 1,
            attempts: 1,
        },
        FinishOptions {
            record_last_task: false,
            preserve_checkpoint: true,
        },
    );

    // A retry of a different task id must not restore "a"'s checkpoint.
    session.begin_task_context(TaskBegin {
        id: "b".into(),
        task_type: "chat".into(),
        input: "y".into(),
        retries: 1,
        started_at: 0,
    });
    assert!(session.context().memory.working.is_empty());
}

// ===========================================================================
// Turn preparation and the injected context message
// ===========================================================================

#[test]
fn turn_preparation_maintains_leading_system_messages() {
    let mut session = Session::new("/tmp/ws", "sys prompt");
    assert_eq!(session.messages().len(), 1);

    session.prepare_user_turn("first", &TurnOptions::default());
    let messages = session.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, Role::System);
    assert!(messages[0].content.starts_with("<context>\n"));
    assert!(messages[0].content.ends_with("\n</context>"));
    assert_eq!(messages[1].content, "sys prompt");
    assert_eq!(messages[2].content, "first");
    let round_one_injection = messages[0].content.clone();

    session.prepare_user_turn("second", &TurnOptions::default());
    let messages = session.messages();
    // The injected message is overwritten in place, never duplicated.
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].content, "sys prompt");
    assert_ne!(messages[0].content, round_one_injection);

    assert_eq!(session.context().runtime.round, 3);
}

#[test]
fn internal_continuation_does_not_advance_round() {
    let mut session = Session::new("/tmp/ws", "sys");
    session.prepare_user_turn("go", &TurnOptions::default());
    let round = session.context().runtime.round;
    session.prepare_internal_continuation_turn("continue", &TurnOptions::default());
    assert_eq!(session.context().runtime.round, round);
}

#[test]
fn replace_latest_user_turn() {
    let mut session = Session::new("/tmp/ws", "sys");
    assert!(!session.replace_latest_user_turn("nothing yet"));
    session.prepare_user_turn("original", &TurnOptions::default());
    assert!(session.replace_latest_user_turn("rewritten"));
    assert_eq!(session.messages().last().unwrap().content, "rewritten");
}

#[test]
fn diagnostics_do_not_touch_round_or_memory() {
    let mut session = Session::new("/tmp/ws", "sys");
    let round = session.context().runtime.round;
    session.update_runtime_diagnostics(Some(json!({"remaining": 3})), Some(json!({"input": 10})));
    assert_eq!(session.context().runtime.round, round);
    assert_eq!(session.context().runtime.budget, Some(json!({"remaining": 3})));
    assert!(session.context().memory.working.is_empty());
}

// ===========================================================================
// Model errors and stop paths
// ===========================================================================

#[tokio::test]
async fn model_error_fails_the_task_with_message_as_text() {
    let executor = ScriptedExecutor::new(vec![]);
    let hooks = Arc::new(RecordingHooks::default());
    let runner = runner_with(executor, hooks.clone(), AgentExecutionConfig::default());
    let mut session = Session::new("/tmp/ws", "sys");

    let result = runner.run_task_detailed(&mut session, "hello", None).await;
    assert!(!result.completed);
    assert!(result.text.contains("script exhausted"));
    assert_eq!(result.stop_reason.as_deref(), Some("model_error"));
    assert_eq!(hooks.after.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn stop_path_preserves_checkpoint_for_retry() {
    let executor = ScriptedExecutor::new(vec![outcome(
        "```context_patch\n{\"memory\": {\"working\": [{\"id\": \"w1\", \"type\": \"note\", \"decay\": 0.1, \"confidence\": 0.9, \"content\": \"partial work\"}]}}\n```",
        FinishReason::Length,
        10,
    )]);
    let hooks = Arc::new(RecordingHooks::default());
    let config = AgentExecutionConfig {
        max_model_steps_per_run: 10,
        auto_continue_on_step_limit: false,
        ..Default::default()
    };
    let runner = runner_with(executor, hooks, config);
    let mut session = Session::new("/tmp/ws", "sys");

    let meta = TaskMeta {
        id: Some("retry-me".into()),
        ..Default::default()
    };
    let result = runner
        .run_task_detailed(&mut session, "long job", Some(meta))
        .await;

    assert!(!result.completed);
    assert_eq!(result.stop_reason.as_deref(), Some("step_limit_segment_continue"));
    // last_task untouched, checkpoint saved for the retry.
    assert!(session.context().last_task.is_none());
    let checkpoint = session.context().task_checkpoint.as_ref().unwrap();
    assert_eq!(checkpoint.task_id, "retry-me");
    assert_eq!(checkpoint.working_memory[0].content, "partial work");
}

#[tokio::test]
async fn total_step_cap_stop_is_terminal() {
    // The segment leaves working memory behind, but hitting the task-wide
    // step cap must not turn it into a retry checkpoint.
    let executor = ScriptedExecutor::new(vec![outcome(
        "```context_patch\n{\"memory\": {\"working\": [{\"id\": \"w1\", \"type\": \"note\", \"decay\": 0.1, \"confidence\": 0.9, \"content\": \"work so far\"}]}}\n```",
        FinishReason::Stop,
        3,
    )]);
    let hooks = Arc::new(RecordingHooks::default());
    let config = AgentExecutionConfig {
        max_model_steps_per_task: 3,
        max_model_steps_per_run: 10,
        ..Default::default()
    };
    let runner = runner_with(executor, hooks, config);
    let mut session = Session::new("/tmp/ws", "sys");

    let result = runner.run_task_detailed(&mut session, "big job", None).await;

    assert!(!result.completed);
    assert_eq!(result.stop_reason.as_deref(), Some("model_step_budget_exhausted"));
    assert!(session.context().task_checkpoint.is_none());
    assert_eq!(session.context().last_task.as_ref().unwrap().status, "failed");
}

/// Executor whose script runs dry by cancelling the in-flight call, the way
/// a real executor surfaces a caller-side cancel.
struct CancelMidSegmentExecutor {
    script: Mutex<VecDeque<GenerateOutcome>>,
    calls: AtomicU32,
}

impl CancelMidSegmentExecutor {
    fn new(outcomes: Vec<GenerateOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait::async_trait]
impl ModelExecutor for CancelMidSegmentExecutor {
    async fn generate(
        &self,
        _request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerateOutcome> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        match self.script.lock().unwrap().pop_front() {
            Some(outcome) => Ok(outcome),
            None => {
                cancel.cancel();
                Err(crucible_core::Error::Cancelled)
            }
        }
    }

    async fn stream(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<StreamHandle> {
        let outcome = self.generate(request, cancel).await?;
        let text_stream = Box::pin(tokio_stream::iter(vec![outcome.text.clone()]));
        Ok(StreamHandle {
            text_stream,
            final_result: Box::pin(async move { Ok(outcome) }),
        })
    }
}

#[tokio::test]
async fn cancel_during_segment_ends_cancelled_and_keeps_checkpoint() {
    let executor = CancelMidSegmentExecutor::new(vec![outcome(
        "```context_patch\n{\"memory\": {\"working\": [{\"id\": \"w1\", \"type\": \"note\", \"decay\": 0.1, \"confidence\": 0.9, \"content\": \"half done\"}]}}\n```",
        FinishReason::Length,
        2,
    )]);
    let hooks = Arc::new(RecordingHooks::default());
    let config = AgentExecutionConfig {
        max_model_steps_per_run: 2,
        max_continuation_runs: 3,
        max_model_steps_per_task: 10,
        ..Default::default()
    };
    let mut deps = RunnerDependencies::new(executor.clone());
    deps.execution_config = config;
    deps.memory_hooks = hooks.clone();
    let runner = Runner::new("test-model", deps);
    let mut session = Session::new("/tmp/ws", "sys");

    let meta = TaskMeta {
        id: Some("cancel-me".into()),
        ..Default::default()
    };
    let result = runner
        .run_task_detailed(&mut session, "long job", Some(meta))
        .await;

    // The auto-continue segment was attempted and cancelled in flight.
    assert_eq!(executor.calls.load(Ordering::Acquire), 2);
    assert!(!result.completed);
    assert_eq!(result.stop_reason.as_deref(), Some("cancelled"));
    assert_eq!(session.context().last_task.as_ref().unwrap().status, "cancelled");

    let checkpoint = session.context().task_checkpoint.as_ref().unwrap();
    assert_eq!(checkpoint.task_id, "cancel-me");
    assert_eq!(checkpoint.working_memory[0].content, "half done");
}

#[tokio::test]
async fn cancelled_before_first_segment() {
    let executor = ScriptedExecutor::new(vec![outcome("unused", FinishReason::Stop, 1)]);
    let hooks = Arc::new(RecordingHooks::default());
    let runner = runner_with(executor.clone(), hooks, AgentExecutionConfig::default());
    let mut session = Session::new("/tmp/ws", "sys");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = runner
        .run_task_cancellable(&mut session, "hello", None, cancel)
        .await;

    assert!(!result.completed);
    assert_eq!(result.stop_reason.as_deref(), Some("cancelled"));
    assert_eq!(executor.calls(), 0);
    assert_eq!(session.context().last_task.as_ref().unwrap().status, "cancelled");
}

#[tokio::test]
async fn token_usage_accumulates_across_segments() {
    let executor = ScriptedExecutor::new(vec![
        outcome_with_usage("partial", FinishReason::Length, 2, 100, 30),
        outcome_with_usage("done", FinishReason::Stop, 1, 150, 20),
    ]);
    let hooks = Arc::new(RecordingHooks::default());
    let config = AgentExecutionConfig {
        max_model_steps_per_run: 2,
        ..Default::default()
    };
    let runner = runner_with(executor, hooks, config);
    let mut session = Session::new("/tmp/ws", "sys");

    let result = runner.run_task_detailed(&mut session, "go", None).await;
    assert!(result.completed);

    let usage = session.context().runtime.token_usage.as_ref().unwrap();
    assert_eq!(usage["input_tokens"], 250);
    assert_eq!(usage["output_tokens"], 50);
    assert_eq!(usage["total_tokens"], 300);
}

// ===========================================================================
// Streaming
// ===========================================================================

#[tokio::test]
async fn stream_yields_deltas_and_matching_result() {
    let executor = ScriptedExecutor::new(vec![outcome("done", FinishReason::Stop, 1)]);
    let hooks = Arc::new(RecordingHooks::default());
    let runner = runner_with(executor, hooks.clone(), AgentExecutionConfig::default());
    let mut session = Session::new("/tmp/ws", "sys");

    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    let result = runner
        .run_task_stream(&mut session, "hello", None, tx, CancellationToken::new())
        .await;

    let mut streamed = String::new();
    while let Ok(chunk) = rx.try_recv() {
        streamed.push_str(&chunk);
    }
    assert_eq!(streamed, "done");
    assert!(result.completed);
    assert_eq!(result.text, "done");
    assert_eq!(hooks.after.lock().unwrap()[0].mode, "stream");
}

// ===========================================================================
// Runner internals
// ===========================================================================

fn item(id: i64, status: TodoStatus) -> TodoItem {
    TodoItem {
        id,
        title: format!("t{id}"),
        note: String::new(),
        status,
        created_at: 0,
        updated_at: 0,
        completed_at: None,
    }
}

fn cursor(next: TodoCursorNext, target_id: Option<u64>) -> TodoCursor {
    TodoCursor {
        v: 1,
        phase: TodoCursorPhase::Doing,
        next,
        target_id,
        note: None,
    }
}

#[test]
fn reconcile_cursor_decisions() {
    let items = [item(1, TodoStatus::Open), item(2, TodoStatus::Done)];

    assert_eq!(
        reconcile_todo_cursor(&cursor(TodoCursorNext::TodoComplete, Some(1)), &items),
        CursorReconciliation::Keep
    );
    assert_eq!(
        reconcile_todo_cursor(&cursor(TodoCursorNext::TodoComplete, Some(9)), &items),
        CursorReconciliation::Clear {
            reason: "target_missing"
        }
    );
    assert_eq!(
        reconcile_todo_cursor(&cursor(TodoCursorNext::TodoComplete, Some(2)), &items),
        CursorReconciliation::Clear {
            reason: "consumed_complete"
        }
    );
    assert_eq!(
        reconcile_todo_cursor(&cursor(TodoCursorNext::TodoList, None), &items),
        CursorReconciliation::Keep
    );
}

#[test]
fn todo_progress_extraction_from_tool_output() {
    let reply = json!({
        "success": true,
        "todo": {"summary": "进行中 1/3（当前第2步）", "total": 3, "step": 2},
    });
    let progress = todo_progress_from_tool_output(&reply).unwrap();
    assert_eq!(progress["total"], 3);

    assert!(todo_progress_from_tool_output(&json!({"success": true})).is_none());
    assert!(todo_progress_from_tool_output(&json!({"todo": {"summary": "x"}})).is_none());
}
