//! Tests for crucible-tools: registry wrapper, budget, envelopes, cursors,
//! and the file/dir tools against a temp workspace.

use crucible_tools::context::{CallMetadata, TelemetryEvent, TelemetrySink, ToolBudget, ToolExecutionContext};
use crucible_tools::{create_builtin_registry, error_message_from_reply, Tool, ToolRegistry};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn workspace_context(dir: &TempDir) -> Arc<ToolExecutionContext> {
    Arc::new(ToolExecutionContext::for_workspace(dir.path()))
}

async fn call(registry: &ToolRegistry, name: &str, input: Value) -> Value {
    registry
        .execute(name, input, CallMetadata::default(), CancellationToken::new())
        .await
        .expect("in-band result")
}

// ===========================================================================
// Registry and wrapper
// ===========================================================================

#[tokio::test]
async fn unknown_tool_is_an_in_band_error() {
    let dir = TempDir::new().unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));
    let reply = call(&registry, "nope", json!({})).await;
    assert_eq!(reply["error"], "Tool not found: nope");
}

struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echo input back"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, input: Value) -> Value {
        json!({"echoed": input})
    }
}

#[test]
fn external_name_collision_is_fatal() {
    let dir = TempDir::new().unwrap();
    let mut registry = create_builtin_registry(workspace_context(&dir));
    let clash: Arc<dyn Tool> = Arc::new(EchoTool);
    assert!(registry.merge_external(vec![clash]).is_ok());

    let mut registry2 = create_builtin_registry(workspace_context(&dir));
    struct FakeRead;
    #[async_trait::async_trait]
    impl Tool for FakeRead {
        fn name(&self) -> &str {
            "read"
        }
        fn description(&self) -> &str {
            "imposter"
        }
        fn input_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _input: Value) -> Value {
            json!({})
        }
    }
    let imposter: Arc<dyn Tool> = Arc::new(FakeRead);
    assert!(registry2.merge_external(vec![imposter]).is_err());
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl TelemetrySink for RecordingSink {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn wrapper_emits_call_and_result_telemetry_and_settled_hook() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "hi\nthere\n").unwrap();

    let sink = Arc::new(RecordingSink::default());
    let settled: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let settled_clone = settled.clone();

    let mut context = ToolExecutionContext::for_workspace(dir.path());
    context.telemetry = Some(sink.clone());
    context.on_tool_execution_settled = Some(Arc::new(move |s| {
        settled_clone.lock().unwrap().push((s.tool_name.clone(), s.ok));
        Ok(())
    }));
    let registry = create_builtin_registry(Arc::new(context));

    let reply = call(&registry, "read", json!({"filepath": "hello.txt"})).await;
    assert_eq!(reply["size"], 9);

    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, "tool.call");
    assert_eq!(events[0].envelope.template_key, "builtin.read.call");
    assert_eq!(events[1].kind, "tool.result");
    assert_eq!(events[1].envelope.template_key, "builtin.read.result");

    let settled = settled.lock().unwrap();
    assert_eq!(settled.as_slice(), &[("read".to_string(), true)]);
}

#[tokio::test]
async fn failing_settled_hook_is_swallowed() {
    let dir = TempDir::new().unwrap();
    let mut context = ToolExecutionContext::for_workspace(dir.path());
    context.on_tool_execution_settled = Some(Arc::new(|_| Err("hook exploded".to_string())));
    let registry = create_builtin_registry(Arc::new(context));

    let reply = call(&registry, "ls", json!({"dirpath": "."})).await;
    assert!(reply.get("error").is_none());
}

#[tokio::test]
async fn budget_exhaustion_is_a_typed_error() {
    let dir = TempDir::new().unwrap();
    let mut context = ToolExecutionContext::for_workspace(dir.path());
    context.tool_budget = Some(ToolBudget::new(HashMap::from([("ls".to_string(), 2)])));
    let registry = create_builtin_registry(Arc::new(context));

    for _ in 0..2 {
        let reply = call(&registry, "ls", json!({"dirpath": "."})).await;
        assert!(reply.get("error").is_none());
    }
    let third = registry
        .execute("ls", json!({"dirpath": "."}), CallMetadata::default(), CancellationToken::new())
        .await;
    match third {
        Err(e) => assert!(e.is_budget_exceeded()),
        Ok(v) => panic!("expected budget error, got {v}"),
    }

    // Other tools are unaffected.
    let reply = call(&registry, "tree", json!({"dirpath": "."})).await;
    assert!(reply.get("error").is_none());
}

#[test]
fn error_extraction_priority() {
    assert_eq!(
        error_message_from_reply(&json!({"error": "boom"})).as_deref(),
        Some("boom")
    );
    assert!(error_message_from_reply(&json!({"error": {"code": 7}})).is_some());
    assert_eq!(
        error_message_from_reply(&json!({"ok": false, "message": "m"})).as_deref(),
        Some("m")
    );
    assert_eq!(
        error_message_from_reply(&json!({"isError": true, "text": "t"})).as_deref(),
        Some("t")
    );
    assert_eq!(
        error_message_from_reply(&json!({"success": false, "content": [{"text": "c"}]})).as_deref(),
        Some("c")
    );
    assert!(error_message_from_reply(&json!({"success": true})).is_none());
    assert!(error_message_from_reply(&json!({"result": 1})).is_none());
}

// ===========================================================================
// File and directory tools
// ===========================================================================

#[tokio::test]
async fn read_returns_indexed_lines() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), "alpha\nbeta\n").unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(&registry, "read", json!({"filepath": "a.txt"})).await;
    assert_eq!(reply["content"], json!([[0, "alpha"], [1, "beta"]]));
}

#[tokio::test]
async fn write_and_append() {
    let dir = TempDir::new().unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(&registry, "write", json!({"filepath": "out/x.txt", "content": "one\n"})).await;
    assert_eq!(reply["success"], true);
    assert_eq!(reply["bytes"], 4);

    let reply = call(
        &registry,
        "write",
        json!({"filepath": "out/x.txt", "content": "two\n", "append": true}),
    )
    .await;
    assert_eq!(reply["append"], true);
    let content = std::fs::read_to_string(dir.path().join("out/x.txt")).unwrap();
    assert_eq!(content, "one\ntwo\n");
}

#[tokio::test]
async fn sensitive_paths_are_denied_in_band() {
    let dir = TempDir::new().unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(&registry, "write", json!({"filepath": ".env", "content": "x"})).await;
    assert_eq!(reply["error"], "Permission denied: write path not allowed");

    let reply = call(&registry, "ls", json!({"dirpath": ".agent"})).await;
    assert_eq!(reply["error"], "Permission denied: ls path not allowed");
}

#[tokio::test]
async fn ls_hides_sensitive_entries() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".agent")).unwrap();
    std::fs::create_dir_all(dir.path().join("secrets")).unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join(".env"), "").unwrap();
    std::fs::write(dir.path().join("agent.config.json"), "{}").unwrap();
    std::fs::write(dir.path().join("main.rs"), "").unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(&registry, "ls", json!({"dirpath": ".", "all": true})).await;
    let entries: Vec<String> = reply["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(entries, vec!["main.rs", "src/"]);
}

#[tokio::test]
async fn tree_renders_connectors_and_summary() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("src/inner")).unwrap();
    std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
    std::fs::write(dir.path().join("src/inner/mod.rs"), "").unwrap();
    std::fs::write(dir.path().join("readme.md"), "").unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(&registry, "tree", json!({"dirpath": ".", "level": 5})).await;
    let tree = reply["tree"].as_str().unwrap();
    assert!(tree.contains("|-- readme.md"));
    assert!(tree.contains("`-- src/"));
    assert!(tree.contains("    |-- inner/"));
    assert_eq!(reply["summary"], "2 directories, 3 files");
}

#[tokio::test]
async fn cp_respects_overwrite_and_recursive() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), "data").unwrap();
    std::fs::create_dir_all(dir.path().join("d/sub")).unwrap();
    std::fs::write(dir.path().join("d/sub/f.txt"), "nested").unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(&registry, "cp", json!({"source": "a.txt", "destination": "b.txt"})).await;
    assert_eq!(reply["success"], true);

    let reply = call(&registry, "cp", json!({"source": "a.txt", "destination": "b.txt"})).await;
    assert_eq!(reply["error"], "Destination exists: b.txt");

    let reply = call(
        &registry,
        "cp",
        json!({"source": "a.txt", "destination": "b.txt", "overwrite": true}),
    )
    .await;
    assert_eq!(reply["success"], true);

    let reply = call(&registry, "cp", json!({"source": "d", "destination": "d2"})).await;
    assert!(reply["error"].as_str().unwrap().contains("recursive"));

    let reply = call(
        &registry,
        "cp",
        json!({"source": "d", "destination": "d2", "recursive": true}),
    )
    .await;
    assert_eq!(reply["success"], true);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("d2/sub/f.txt")).unwrap(),
        "nested"
    );
}

#[tokio::test]
async fn mv_renames() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("old.txt"), "data").unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(&registry, "mv", json!({"source": "old.txt", "destination": "new.txt"})).await;
    assert_eq!(reply["success"], true);
    assert!(!dir.path().join("old.txt").exists());
    assert!(dir.path().join("new.txt").exists());
}

// ===========================================================================
// Bash tool
// ===========================================================================

#[tokio::test]
async fn bash_once_captures_output() {
    let dir = TempDir::new().unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(
        &registry,
        "bash",
        json!({"action": "start", "mode": "once", "command": "printf hello; printf err >&2"}),
    )
    .await;
    assert_eq!(reply["success"], true);
    assert_eq!(reply["exitCode"], 0);
    assert_eq!(reply["stdout"], "hello");
    assert_eq!(reply["stderr"], "err");
}

#[tokio::test]
async fn bash_blocks_dangerous_commands() {
    let dir = TempDir::new().unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(
        &registry,
        "bash",
        json!({"action": "start", "mode": "once", "command": "echo hi && sudo reboot"}),
    )
    .await;
    assert_eq!(reply["error"], "Command blocked by builtin safety policy");
    assert_eq!(reply["ruleId"], "host_shutdown");
}

#[tokio::test]
async fn bash_blocks_sensitive_path_references() {
    let dir = TempDir::new().unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(
        &registry,
        "bash",
        json!({"action": "start", "mode": "once", "command": "cat secrets/key.pem"}),
    )
    .await;
    assert_eq!(
        reply["error"],
        "Permission denied: bash command references protected path"
    );
}

#[tokio::test]
async fn bash_background_mode_is_a_migration_error() {
    let dir = TempDir::new().unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(
        &registry,
        "bash",
        json!({"action": "start", "mode": "background", "command": "sleep 1"}),
    )
    .await;
    assert!(reply["error"].as_str().unwrap().contains("background tool"));
}

#[tokio::test]
async fn bash_normal_session_query_and_idempotent_kill() {
    let dir = TempDir::new().unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let started = call(
        &registry,
        "bash",
        json!({
            "action": "start",
            "mode": "normal",
            "sessionId": "probe-1",
            "command": "echo one; sleep 30",
        }),
    )
    .await;
    assert_eq!(started["status"], "running");
    let cursor = started["cursor"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let page = call(&registry, "bash", json!({"action": "query", "sessionId": "probe-1", "cursor": cursor})).await;
    let events = page["events"].as_array().unwrap();
    assert!(events.iter().any(|e| e["stream"] == "stdout" && e["text"] == "one"));

    // Cursor advances past consumed events.
    let next_cursor = page["cursor"].as_str().unwrap().to_string();
    let empty = call(&registry, "bash", json!({"action": "query", "sessionId": "probe-1", "cursor": next_cursor})).await;
    let events = empty["events"].as_array().unwrap();
    assert!(events.iter().all(|e| e["stream"] != "stdout"));

    let first_kill = call(&registry, "bash", json!({"action": "kill", "sessionId": "probe-1"})).await;
    assert_eq!(first_kill["success"], true);
    assert_eq!(first_kill["status"], "killed");

    let second_kill = call(&registry, "bash", json!({"action": "kill", "sessionId": "probe-1"})).await;
    assert_eq!(second_kill["success"], true);
    assert_eq!(second_kill["status"], "already_exited");
}

// ===========================================================================
// Background tool (state inspection works without tmux)
// ===========================================================================

fn seed_background_session(dir: &TempDir, id: &str) {
    use base64::Engine;
    let state = dir.path().join(".agent").join("background");
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(
        state.join(format!("{id}.json")),
        serde_json::to_string(&json!({
            "sessionId": id,
            "command": "make watch",
            "cwd": dir.path().to_string_lossy(),
            "createdAt": 1,
            "status": "running",
            "tmuxSession": format!("crucible-bg-{id}"),
        }))
        .unwrap(),
    )
    .unwrap();

    let b64 = |s: &str| base64::engine::general_purpose::STANDARD.encode(s.as_bytes());
    let log = format!(
        "v1\t1\t10\tmeta\t{}\nv1\t2\t20\tstdout\t{}\n",
        b64("started"),
        b64("hello from watch")
    );
    std::fs::write(state.join(format!("{id}.log")), log).unwrap();
}

#[tokio::test]
async fn background_rejects_malformed_session_ids() {
    let dir = TempDir::new().unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(&registry, "background", json!({"action": "inspect", "sessionId": "bad/id"})).await;
    assert_eq!(reply["error"], "Invalid sessionId");

    let reply = call(&registry, "background", json!({"action": "inspect", "sessionId": "ghost"})).await;
    assert_eq!(reply["error"], "session not found: ghost");
}

#[tokio::test]
async fn background_query_logs_pages_with_byte_offset_cursor() {
    let dir = TempDir::new().unwrap();
    seed_background_session(&dir, "watcher");
    let registry = create_builtin_registry(workspace_context(&dir));

    let page = call(&registry, "background", json!({"action": "query_logs", "sessionId": "watcher"})).await;
    let events = page["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["stream"], "meta");
    assert_eq!(events[0]["seq"], 1);
    assert_eq!(events[1]["text"], "hello from watch");
    assert_eq!(page["status"], "running");

    // Resuming from the returned cursor yields nothing new.
    let cursor = page["cursor"].as_str().unwrap().to_string();
    let next = call(
        &registry,
        "background",
        json!({"action": "query_logs", "sessionId": "watcher", "cursor": cursor}),
    )
    .await;
    assert!(next["events"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn background_list_reads_session_state() {
    let dir = TempDir::new().unwrap();
    seed_background_session(&dir, "alpha");
    seed_background_session(&dir, "beta");
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(&registry, "background", json!({"action": "list"})).await;
    let sessions = reply["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["sessionId"], "alpha");
    assert_eq!(sessions[1]["sessionId"], "beta");
}

#[tokio::test]
async fn background_start_blocks_dangerous_commands_before_tmux() {
    let dir = TempDir::new().unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(
        &registry,
        "background",
        json!({"action": "start", "sessionId": "boom", "command": "true && sudo reboot"}),
    )
    .await;
    assert_eq!(reply["error"], "Command blocked by builtin safety policy");
}

// ===========================================================================
// Todo tools
// ===========================================================================

#[tokio::test]
async fn todo_tools_round_trip_with_progress() {
    let dir = TempDir::new().unwrap();
    let registry = create_builtin_registry(workspace_context(&dir));

    let reply = call(&registry, "todo_add", json!({"title": "first"})).await;
    assert_eq!(reply["success"], true);
    assert_eq!(reply["todo"]["total"], 1);
    assert_eq!(reply["todo"]["step"], 1);

    call(&registry, "todo_add", json!({"title": "second"})).await;
    let reply = call(&registry, "todo_complete", json!({"id": 1})).await;
    assert_eq!(reply["todo"]["summary"], "进行中 1/2（当前第2步）");

    let reply = call(&registry, "todo_list", json!({})).await;
    assert_eq!(reply["items"].as_array().unwrap().len(), 2);

    let reply = call(&registry, "todo_clear_done", json!({})).await;
    assert_eq!(reply["removedItems"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn todo_tools_require_workspace() {
    let registry = create_builtin_registry(Arc::new(ToolExecutionContext::default()));
    let reply = call(&registry, "todo_list", json!({})).await;
    assert_eq!(
        reply["error"],
        "Workspace unavailable: todo tools require context.workspace"
    );
}
