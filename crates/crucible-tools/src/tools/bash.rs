//! Bash tool: one-shot commands and tracked long-lived sessions.
//!
//! `once` runs a command to completion with output capture. `normal` spawns
//! a process tracked in the process-wide session map; readers page through
//! its events with a monotone seq cursor. The legacy `background` mode is a
//! typed migration error pointing at the background tool.

use super::{err, permission_denied, require_workspace};
use crate::context::ToolExecutionContext;
use crate::cursor::{decode_normal_cursor, encode_cursor, SessionCursor};
use crate::probe::bash_available;
use crate::registry::Tool;
use crucible_policy::{can_use_bash, has_sensitive_path_reference, validate_bash_command_safety};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_ONCE_TIMEOUT_MS: u64 = 120_000;
const MAX_ONCE_TIMEOUT_MS: u64 = 600_000;
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;
const TERM_TO_KILL_GRACE_MS: u64 = 1_000;
const MAX_OUTPUT_CHARS: usize = 30_000;

const STATUS_RUNNING: &str = "running";
const STATUS_EXITED: &str = "exited";
const STATUS_IDLE_TIMEOUT: &str = "idle_timeout";
const STATUS_KILLED: &str = "killed";

fn session_id_valid(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[derive(Clone, Debug)]
struct SessionEvent {
    seq: u64,
    ts: i64,
    stream: &'static str,
    text: String,
}

struct NormalSession {
    events: Mutex<Vec<SessionEvent>>,
    next_seq: AtomicU64,
    status: Mutex<String>,
    last_activity: Mutex<Instant>,
    kill_token: CancellationToken,
}

impl NormalSession {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            status: Mutex::new(STATUS_RUNNING.to_string()),
            last_activity: Mutex::new(Instant::now()),
            kill_token: CancellationToken::new(),
        }
    }

    fn push_event(&self, stream: &'static str, text: String) {
        let seq = self.next_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let event = SessionEvent {
            seq,
            ts: chrono::Utc::now().timestamp_millis(),
            stream,
            text,
        };
        self.events.lock().expect("events lock").push(event);
        *self.last_activity.lock().expect("activity lock") = Instant::now();
    }

    fn status(&self) -> String {
        self.status.lock().expect("status lock").clone()
    }

    fn set_status(&self, status: &str) {
        *self.status.lock().expect("status lock") = status.to_string();
    }

    fn is_terminal(&self) -> bool {
        let status = self.status();
        status == STATUS_EXITED || status == STATUS_KILLED
    }

    fn events_after(&self, cursor: u64) -> Vec<SessionEvent> {
        self.events
            .lock()
            .expect("events lock")
            .iter()
            .filter(|e| e.seq > cursor)
            .cloned()
            .collect()
    }
}

fn sessions() -> &'static DashMap<String, Arc<NormalSession>> {
    static SESSIONS: OnceLock<DashMap<String, Arc<NormalSession>>> = OnceLock::new();
    SESSIONS.get_or_init(DashMap::new)
}

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

pub struct BashTool {
    context: Arc<ToolExecutionContext>,
}

impl BashTool {
    pub fn new(context: Arc<ToolExecutionContext>) -> Self {
        Self { context }
    }

    fn check_command(&self, command: &str, ws: &str, cwd: &str) -> Option<Value> {
        let verdict = validate_bash_command_safety(command);
        if !verdict.ok {
            return Some(json!({
                "error": "Command blocked by builtin safety policy",
                "ruleId": verdict.rule_id,
                "detail": verdict.message,
            }));
        }
        if has_sensitive_path_reference(command, ws, cwd) {
            return Some(err("Permission denied: bash command references protected path"));
        }
        None
    }

    async fn run_once(&self, input: &Value, cancel: CancellationToken) -> Value {
        let Some(command) = input.get("command").and_then(Value::as_str) else {
            return err("Invalid input");
        };
        let (root, ws) = match require_workspace(&self.context, "bash") {
            Ok(v) => v,
            Err(e) => return e,
        };
        if !can_use_bash(&root.to_string_lossy(), &self.context.permissions, &ws) {
            return permission_denied("bash");
        }
        if let Some(blocked) = self.check_command(command, &ws, &root.to_string_lossy()) {
            return blocked;
        }
        if !bash_available().await {
            return err("bash command is not available in runtime environment");
        }

        let timeout_ms = input
            .get("timeoutMs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_ONCE_TIMEOUT_MS)
            .min(MAX_ONCE_TIMEOUT_MS);

        debug!("bash once: {}", &command[..command.len().min(120)]);
        let started = Instant::now();
        let mut child = match Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&root)
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return err(format!("Failed to spawn: {e}")),
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tokio::select! {
            waited = tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()) => {
                match waited {
                    Ok(Ok(status)) => {
                        let stdout = read_pipe(stdout).await;
                        let stderr = read_pipe(stderr).await;
                        json!({
                            "success": status.success(),
                            "exitCode": status.code().unwrap_or(-1),
                            "stdout": clip(&stdout),
                            "stderr": clip(&stderr),
                            "durationMs": started.elapsed().as_millis() as u64,
                        })
                    }
                    Ok(Err(e)) => err(format!("Failed to wait: {e}")),
                    Err(_) => {
                        let _ = child.kill().await;
                        err(format!("Command timed out after {timeout_ms}ms"))
                    }
                }
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                err("cancelled")
            }
        }
    }

    async fn start_normal(&self, input: &Value) -> Value {
        let Some(command) = input.get("command").and_then(Value::as_str) else {
            return err("Invalid input");
        };
        let (root, ws) = match require_workspace(&self.context, "bash") {
            Ok(v) => v,
            Err(e) => return e,
        };
        if !can_use_bash(&root.to_string_lossy(), &self.context.permissions, &ws) {
            return permission_denied("bash");
        }

        let cwd = match input.get("cwd").and_then(Value::as_str) {
            Some(cwd) => {
                let path = super::resolve_path(&root, cwd);
                if !path.is_dir() {
                    return err("Invalid cwd");
                }
                path
            }
            None => root.clone(),
        };

        if let Some(blocked) = self.check_command(command, &ws, &cwd.to_string_lossy()) {
            return blocked;
        }
        if !bash_available().await {
            return err("bash command is not available in runtime environment");
        }

        let session_id = match input.get("sessionId").and_then(Value::as_str) {
            Some(id) => {
                if !session_id_valid(id) {
                    return err("Invalid sessionId");
                }
                id.to_string()
            }
            None => format!("bash-{}", SESSION_COUNTER.fetch_add(1, Ordering::AcqRel)),
        };
        if sessions().contains_key(&session_id) {
            return err(format!("duplicate session id: {session_id}"));
        }

        let idle_timeout_ms = input
            .get("idleTimeoutMs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_MS);

        let mut child = match Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return err(format!("Failed to spawn: {e}")),
        };
        let pid = child.id();

        let session = Arc::new(NormalSession::new());
        sessions().insert(session_id.clone(), session.clone());
        session.push_event("meta", format!("started pid={}", pid.unwrap_or(0)));

        if let Some(stdout) = child.stdout.take() {
            spawn_reader(session.clone(), stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(session.clone(), stderr, "stderr");
        }

        // Waiter: owns the child; force-kill on the session's kill token.
        {
            let session = session.clone();
            tokio::spawn(async move {
                tokio::select! {
                    waited = child.wait() => {
                        let code = waited.ok().and_then(|s| s.code()).unwrap_or(-1);
                        session.push_event("meta", format!("exit code={code}"));
                        let terminal = if session.status() == STATUS_IDLE_TIMEOUT {
                            STATUS_KILLED
                        } else {
                            STATUS_EXITED
                        };
                        session.set_status(terminal);
                    }
                    _ = session.kill_token.cancelled() => {
                        let _ = child.kill().await;
                        let _ = child.wait().await;
                        session.push_event("meta", "killed".to_string());
                        session.set_status(STATUS_KILLED);
                    }
                }
            });
        }

        // Idle watchdog: TERM, then KILL after the grace period.
        {
            let session = session.clone();
            tokio::spawn(async move {
                let idle = Duration::from_millis(idle_timeout_ms);
                loop {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    if session.is_terminal() {
                        return;
                    }
                    let idle_for = session
                        .last_activity
                        .lock()
                        .expect("activity lock")
                        .elapsed();
                    if idle_for < idle {
                        continue;
                    }
                    session.set_status(STATUS_IDLE_TIMEOUT);
                    session.push_event("meta", "idle_timeout".to_string());
                    if let Some(pid) = pid {
                        let _ = Command::new("kill")
                            .args(["-s", "TERM", &pid.to_string()])
                            .status()
                            .await;
                    }
                    tokio::time::sleep(Duration::from_millis(TERM_TO_KILL_GRACE_MS)).await;
                    if !session.is_terminal() {
                        session.kill_token.cancel();
                    }
                    return;
                }
            });
        }

        json!({
            "sessionId": session_id,
            "status": STATUS_RUNNING,
            "cursor": encode_cursor(&SessionCursor::Normal { seq: 0 }),
        })
    }

    fn query(&self, input: &Value) -> Value {
        let Some(session_id) = input.get("sessionId").and_then(Value::as_str) else {
            return err("Invalid sessionId");
        };
        let Some(session) = sessions().get(session_id).map(|s| s.value().clone()) else {
            return err(format!("session not found: {session_id}"));
        };

        let after = match input.get("cursor").and_then(Value::as_str) {
            Some(cursor) => match decode_normal_cursor(cursor) {
                Ok(seq) => seq,
                Err(_) => return err("Invalid cursor"),
            },
            None => 0,
        };

        let events = session.events_after(after);
        let last_seq = events.last().map(|e| e.seq).unwrap_or(after);
        let status = session.status();

        json!({
            "sessionId": session_id,
            "status": status,
            "events": events.iter().map(|e| json!({
                "seq": e.seq,
                "ts": e.ts,
                "stream": e.stream,
                "text": e.text,
            })).collect::<Vec<_>>(),
            "cursor": encode_cursor(&SessionCursor::Normal { seq: last_seq }),
        })
    }

    fn kill(&self, input: &Value) -> Value {
        let Some(session_id) = input.get("sessionId").and_then(Value::as_str) else {
            return err("Invalid sessionId");
        };
        let Some(session) = sessions().get(session_id).map(|s| s.value().clone()) else {
            return err(format!("session not found: {session_id}"));
        };

        if session.is_terminal() {
            return json!({"success": true, "sessionId": session_id, "status": "already_exited"});
        }
        session.kill_token.cancel();
        session.set_status(STATUS_KILLED);
        json!({"success": true, "sessionId": session_id, "status": STATUS_KILLED})
    }

    async fn run(&self, input: Value, cancel: CancellationToken) -> Value {
        let action = input.get("action").and_then(Value::as_str).unwrap_or("start");
        let mode = input.get("mode").and_then(Value::as_str).unwrap_or("once");

        match (action, mode) {
            ("start", "once") => self.run_once(&input, cancel).await,
            ("start", "normal") => self.start_normal(&input).await,
            ("start", "background") => err(
                "bash background mode has been replaced: use the background tool for persistent sessions",
            ),
            ("query", _) => self.query(&input),
            ("kill", _) => self.kill(&input),
            _ => err("Invalid input"),
        }
    }
}

fn spawn_reader(
    session: Arc<NormalSession>,
    pipe: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    stream: &'static str,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            session.push_event(stream, line);
        }
    });
}

async fn read_pipe(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    use tokio::io::AsyncReadExt;
    match pipe {
        Some(mut p) => {
            let mut buf = Vec::new();
            let _ = p.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        }
        None => String::new(),
    }
}

fn clip(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_CHARS {
        return s.trim_end().to_string();
    }
    let mut cut = MAX_OUTPUT_CHARS;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... [truncated, {} total chars]", &s[..cut], s.len())
}

#[async_trait::async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run shell commands. mode 'once' runs to completion with captured \
         output; mode 'normal' starts a tracked session queried with a \
         cursor and killed explicitly."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["start", "query", "kill"],
                    "description": "Operation (default start)"
                },
                "mode": {
                    "type": "string",
                    "enum": ["once", "normal", "background"],
                    "description": "Execution mode for start (default once)"
                },
                "command": {"type": "string", "description": "Command for start"},
                "sessionId": {"type": "string", "description": "Session for query/kill"},
                "cursor": {"type": "string", "description": "Resume cursor for query"},
                "cwd": {"type": "string", "description": "Working directory for normal sessions"},
                "timeoutMs": {"type": "integer", "description": "Timeout for once mode (default 120000)"},
                "idleTimeoutMs": {"type": "integer", "description": "Idle timeout for normal sessions (default 60000)"}
            },
            "required": []
        })
    }

    async fn execute(&self, input: Value) -> Value {
        self.run(input, CancellationToken::new()).await
    }

    async fn execute_cancellable(&self, input: Value, cancel: CancellationToken) -> Value {
        self.run(input, cancel).await
    }
}

/// Test hook: drop every tracked session.
pub fn clear_normal_sessions_for_tests() {
    sessions().clear();
}
