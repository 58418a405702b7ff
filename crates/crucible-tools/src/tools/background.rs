//! Background tool: persistent tmux-backed sessions.
//!
//! State lives under `{workspace}/.agent/background/` as
//! `{sessionId}.{json,log,cmd.sh,runner.sh}`. The log is an append-only v1
//! TSV (`v1\tseq\tts\tstream\tbase64(text)`); readers page through it with a
//! byte-offset cursor.

use super::{err, err_detail, permission_denied, require_workspace, required_str, resolve_path};
use crate::context::ToolExecutionContext;
use crate::cursor::{decode_background_cursor, encode_cursor, SessionCursor};
use crate::probe::tmux_available;
use crate::registry::Tool;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crucible_policy::{can_use_background, has_sensitive_path_reference, validate_bash_command_safety};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

const TMUX_UNAVAILABLE: &str = "tmux command is not available in runtime environment";
const TMUX_PREFIX: &str = "crucible-bg-";
const DEFAULT_CAPTURE_LINES: u64 = 200;

fn session_id_valid(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct BackgroundMeta {
    #[serde(rename = "sessionId")]
    session_id: String,
    command: String,
    cwd: String,
    #[serde(rename = "createdAt")]
    created_at: i64,
    status: String,
    #[serde(rename = "tmuxSession")]
    tmux_session: String,
}

async fn run_tmux(args: &[&str]) -> Result<String, String> {
    let output = Command::new("tmux")
        .args(args)
        .output()
        .await
        .map_err(|e| format!("tmux exec failed: {e}"))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(format!(
            "tmux error: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

async fn tmux_session_alive(name: &str) -> bool {
    run_tmux(&["has-session", "-t", name]).await.is_ok()
}

pub struct BackgroundTool {
    context: Arc<ToolExecutionContext>,
}

struct SessionPaths {
    meta: PathBuf,
    log: PathBuf,
    seq: PathBuf,
    cmd: PathBuf,
    runner: PathBuf,
}

fn state_dir(root: &Path) -> PathBuf {
    root.join(".agent").join("background")
}

fn paths_for(root: &Path, id: &str) -> SessionPaths {
    let dir = state_dir(root);
    SessionPaths {
        meta: dir.join(format!("{id}.json")),
        log: dir.join(format!("{id}.log")),
        seq: dir.join(format!("{id}.log.seq")),
        cmd: dir.join(format!("{id}.cmd.sh")),
        runner: dir.join(format!("{id}.runner.sh")),
    }
}

fn read_meta(paths: &SessionPaths) -> Option<BackgroundMeta> {
    let raw = std::fs::read_to_string(&paths.meta).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_meta(paths: &SessionPaths, meta: &BackgroundMeta) -> std::io::Result<()> {
    std::fs::write(&paths.meta, serde_json::to_string_pretty(meta).unwrap_or_default())
}

/// Append one event from the owning action. The runner script is the only
/// other writer and uses the same seq file under its own lock.
fn append_meta_event(paths: &SessionPaths, text: &str) {
    let seq = std::fs::read_to_string(&paths.seq)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    let _ = std::fs::write(&paths.seq, seq.to_string());
    let line = format!(
        "v1\t{seq}\t{}\tmeta\t{}\n",
        chrono::Utc::now().timestamp_millis(),
        BASE64.encode(text.as_bytes())
    );
    use std::io::Write;
    if let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log)
    {
        let _ = file.write_all(line.as_bytes());
    }
}

fn runner_script(paths: &SessionPaths) -> String {
    format!(
        r#"#!/usr/bin/env bash
set -u
LOG="{log}"
SEQF="{seq}"
CMD="{cmd}"
append() {{
  local stream="$1" line="$2"
  exec 9>>"$LOG.lock"
  flock 9
  local seq
  seq=$(( $( [ -f "$SEQF" ] && cat "$SEQF" || echo 0 ) + 1 ))
  echo "$seq" > "$SEQF"
  printf 'v1\t%s\t%s\t%s\t%s\n' "$seq" "$(date +%s%3N)" "$stream" "$(printf %s "$line" | base64 | tr -d '\n')" >> "$LOG"
  flock -u 9
}}
bash "$CMD" \
  > >(while IFS= read -r line; do append stdout "$line"; done) \
  2> >(while IFS= read -r line; do append stderr "$line"; done)
code=$?
wait
append meta "exit code=$code"
"#,
        log = paths.log.display(),
        seq = paths.seq.display(),
        cmd = paths.cmd.display(),
    )
}

#[derive(Debug)]
struct LogPage {
    events: Vec<Value>,
    next_offset: u64,
}

fn read_log_page(paths: &SessionPaths, offset: u64) -> std::io::Result<LogPage> {
    let raw = match std::fs::read(&paths.log) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e),
    };
    let start = (offset as usize).min(raw.len());
    let slice = &raw[start..];

    // Only complete lines advance the cursor.
    let consumed = slice.iter().rposition(|b| *b == b'\n').map(|p| p + 1).unwrap_or(0);
    let mut events = Vec::new();
    for line in String::from_utf8_lossy(&slice[..consumed]).lines() {
        let fields: Vec<&str> = line.splitn(5, '\t').collect();
        if fields.len() != 5 || fields[0] != "v1" {
            continue;
        }
        let seq = fields[1].parse::<u64>().unwrap_or(0);
        let ts = fields[2].parse::<i64>().unwrap_or(0);
        let text = BASE64
            .decode(fields[4].as_bytes())
            .ok()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        events.push(json!({"seq": seq, "ts": ts, "stream": fields[3], "text": text}));
    }
    Ok(LogPage {
        events,
        next_offset: (start + consumed) as u64,
    })
}

impl BackgroundTool {
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
            return Some(err(
                "Permission denied: background command references protected path",
            ));
        }
        None
    }

    async fn start(&self, input: &Value, root: &Path, ws: &str) -> Value {
        let session_id = match required_str(input, "sessionId") {
            Ok(id) => id,
            Err(e) => return e,
        };
        if !session_id_valid(session_id) {
            return err("Invalid sessionId");
        }
        let command = match required_str(input, "command") {
            Ok(c) => c,
            Err(e) => return e,
        };

        let cwd = match input.get("cwd").and_then(Value::as_str) {
            Some(cwd) => {
                let path = resolve_path(root, cwd);
                if !path.is_dir() {
                    return err("Invalid cwd");
                }
                path
            }
            None => root.to_path_buf(),
        };
        if let Some(blocked) = self.check_command(command, ws, &cwd.to_string_lossy()) {
            return blocked;
        }
        if !tmux_available().await {
            return err(TMUX_UNAVAILABLE);
        }

        let paths = paths_for(root, session_id);
        if paths.meta.exists() {
            return err(format!("duplicate session id: {session_id}"));
        }
        if let Err(e) = std::fs::create_dir_all(state_dir(root)) {
            return err(format!("Failed to create state dir: {e}"));
        }

        if let Err(e) = std::fs::write(&paths.cmd, format!("{command}\n")) {
            return err(format!("Failed to write command script: {e}"));
        }
        if let Err(e) = std::fs::write(&paths.runner, runner_script(&paths)) {
            return err(format!("Failed to write runner script: {e}"));
        }

        let tmux_session = format!("{TMUX_PREFIX}{session_id}");
        let meta = BackgroundMeta {
            session_id: session_id.to_string(),
            command: command.to_string(),
            cwd: cwd.to_string_lossy().into_owned(),
            created_at: chrono::Utc::now().timestamp_millis(),
            status: "running".to_string(),
            tmux_session: tmux_session.clone(),
        };
        if let Err(e) = write_meta(&paths, &meta) {
            return err(format!("Failed to write session state: {e}"));
        }
        append_meta_event(&paths, "started");

        let runner = paths.runner.to_string_lossy().into_owned();
        let cwd_str = cwd.to_string_lossy().into_owned();
        if let Err(e) = run_tmux(&[
            "new-session", "-d", "-s", &tmux_session, "-c", &cwd_str, "bash", &runner,
        ])
        .await
        {
            return err(e);
        }

        debug!("background start: {} ({})", session_id, tmux_session);
        json!({
            "sessionId": session_id,
            "status": "running",
            "cursor": encode_cursor(&SessionCursor::Background { offset: 0 }),
        })
    }

    async fn list(&self, root: &Path) -> Value {
        let dir = state_dir(root);
        let mut sessions: Vec<Value> = Vec::new();
        let tmux_ok = tmux_available().await;

        if let Ok(read_dir) = std::fs::read_dir(&dir) {
            for entry in read_dir.flatten() {
                let path = entry.path();
                if !path.extension().map_or(false, |e| e == "json") {
                    continue;
                }
                let Some(id) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                    continue;
                };
                let paths = paths_for(root, &id);
                let Some(meta) = read_meta(&paths) else { continue };
                let alive = if tmux_ok {
                    Some(tmux_session_alive(&meta.tmux_session).await)
                } else {
                    None
                };
                sessions.push(json!({
                    "sessionId": meta.session_id,
                    "status": meta.status,
                    "createdAt": meta.created_at,
                    "alive": alive,
                }));
            }
        }
        sessions.sort_by(|a, b| {
            a["sessionId"]
                .as_str()
                .unwrap_or_default()
                .cmp(b["sessionId"].as_str().unwrap_or_default())
        });

        let mut reply = json!({"sessions": sessions});
        if !tmux_ok {
            reply["warning"] = Value::String(TMUX_UNAVAILABLE.to_string());
        }
        reply
    }

    async fn inspect(&self, input: &Value, root: &Path) -> Value {
        let (session_id, paths, meta) = match self.load_session(input, root) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let log_bytes = std::fs::metadata(&paths.log).map(|m| m.len()).unwrap_or(0);
        let tmux_ok = tmux_available().await;
        let alive = if tmux_ok {
            Some(tmux_session_alive(&meta.tmux_session).await)
        } else {
            None
        };

        let mut reply = json!({
            "sessionId": session_id,
            "command": meta.command,
            "cwd": meta.cwd,
            "createdAt": meta.created_at,
            "status": meta.status,
            "logBytes": log_bytes,
            "alive": alive,
        });
        if !tmux_ok {
            reply["warning"] = Value::String(TMUX_UNAVAILABLE.to_string());
        }
        reply
    }

    async fn query_logs(&self, input: &Value, root: &Path) -> Value {
        let (session_id, paths, meta) = match self.load_session(input, root) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let offset = match input.get("cursor").and_then(Value::as_str) {
            Some(cursor) => match decode_background_cursor(cursor) {
                Ok(offset) => offset,
                Err(_) => return err("Invalid cursor"),
            },
            None => 0,
        };

        let page = match read_log_page(&paths, offset) {
            Ok(page) => page,
            Err(e) => return err(format!("Failed to read log: {e}")),
        };

        let mut reply = json!({
            "sessionId": session_id,
            "status": meta.status,
            "events": page.events,
            "cursor": encode_cursor(&SessionCursor::Background { offset: page.next_offset }),
        });
        if !tmux_available().await {
            reply["warning"] = Value::String(TMUX_UNAVAILABLE.to_string());
        }
        reply
    }

    async fn capture_pane(&self, input: &Value, root: &Path) -> Value {
        let (session_id, _paths, meta) = match self.load_session(input, root) {
            Ok(v) => v,
            Err(e) => return e,
        };
        if !tmux_available().await {
            return err(TMUX_UNAVAILABLE);
        }
        let lines = input
            .get("lines")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_CAPTURE_LINES);
        match run_tmux(&[
            "capture-pane", "-t", &meta.tmux_session, "-p", "-S", &format!("-{lines}"),
        ])
        .await
        {
            Ok(content) => json!({"sessionId": session_id, "content": content}),
            Err(e) => err(e),
        }
    }

    async fn send_keys(&self, input: &Value, root: &Path, ws: &str) -> Value {
        let (session_id, _paths, meta) = match self.load_session(input, root) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let keys = match required_str(input, "keys") {
            Ok(k) => k,
            Err(e) => return e,
        };
        if let Some(blocked) = self.check_command(keys, ws, &meta.cwd) {
            return blocked;
        }
        if !tmux_available().await {
            return err(TMUX_UNAVAILABLE);
        }
        match run_tmux(&["send-keys", "-t", &meta.tmux_session, keys, "Enter"]).await {
            Ok(_) => json!({"success": true, "sessionId": session_id}),
            Err(e) => err(e),
        }
    }

    async fn new_window(&self, input: &Value, root: &Path, ws: &str) -> Value {
        let (session_id, _paths, meta) = match self.load_session(input, root) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let cwd = match input.get("cwd").and_then(Value::as_str) {
            Some(cwd) => {
                let path = resolve_path(root, cwd);
                if !path.is_dir() {
                    return err("Invalid cwd");
                }
                path.to_string_lossy().into_owned()
            }
            None => meta.cwd.clone(),
        };
        let command = input.get("command").and_then(Value::as_str);
        if let Some(command) = command {
            if let Some(blocked) = self.check_command(command, ws, &cwd) {
                return blocked;
            }
        }
        if !tmux_available().await {
            return err(TMUX_UNAVAILABLE);
        }

        let mut args: Vec<&str> = vec!["new-window", "-t", &meta.tmux_session, "-c", &cwd];
        if let Some(command) = command {
            args.push(command);
        }
        match run_tmux(&args).await {
            Ok(_) => json!({"success": true, "sessionId": session_id}),
            Err(e) => err(e),
        }
    }

    async fn split_pane(&self, input: &Value, root: &Path, ws: &str) -> Value {
        let (session_id, _paths, meta) = match self.load_session(input, root) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let cwd = match input.get("cwd").and_then(Value::as_str) {
            Some(cwd) => {
                let path = resolve_path(root, cwd);
                if !path.is_dir() {
                    return err("Invalid cwd");
                }
                path.to_string_lossy().into_owned()
            }
            None => meta.cwd.clone(),
        };
        let command = input.get("command").and_then(Value::as_str);
        if let Some(command) = command {
            if let Some(blocked) = self.check_command(command, ws, &cwd) {
                return blocked;
            }
        }
        if !tmux_available().await {
            return err(TMUX_UNAVAILABLE);
        }

        let vertical = input.get("vertical").and_then(Value::as_bool).unwrap_or(false);
        let orientation = if vertical { "-v" } else { "-h" };
        let mut args: Vec<&str> = vec!["split-window", orientation, "-t", &meta.tmux_session, "-c", &cwd];
        if let Some(command) = command {
            args.push(command);
        }
        match run_tmux(&args).await {
            Ok(_) => json!({"success": true, "sessionId": session_id}),
            Err(e) => err(e),
        }
    }

    async fn kill(&self, input: &Value, root: &Path) -> Value {
        let (session_id, paths, mut meta) = match self.load_session(input, root) {
            Ok(v) => v,
            Err(e) => return e,
        };
        if !tmux_available().await {
            return err(TMUX_UNAVAILABLE);
        }
        if meta.status == "killed" {
            return json!({"success": true, "sessionId": session_id, "status": "already_exited"});
        }

        let _ = run_tmux(&["kill-session", "-t", &meta.tmux_session]).await;
        meta.status = "killed".to_string();
        if let Err(e) = write_meta(&paths, &meta) {
            return err(format!("Failed to update session state: {e}"));
        }
        append_meta_event(&paths, "killed");
        json!({"success": true, "sessionId": session_id, "status": "killed"})
    }

    fn load_session(
        &self,
        input: &Value,
        root: &Path,
    ) -> Result<(String, SessionPaths, BackgroundMeta), Value> {
        let session_id = required_str(input, "sessionId")?.to_string();
        if !session_id_valid(&session_id) {
            return Err(err("Invalid sessionId"));
        }
        let paths = paths_for(root, &session_id);
        let Some(meta) = read_meta(&paths) else {
            return Err(err(format!("session not found: {session_id}")));
        };
        Ok((session_id, paths, meta))
    }
}

#[async_trait::async_trait]
impl Tool for BackgroundTool {
    fn name(&self) -> &str {
        "background"
    }

    fn description(&self) -> &str {
        "Manage persistent tmux-backed sessions: start, list, inspect, \
         query_logs, capture_pane, send_keys, new_window, split_pane, kill."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["start", "list", "inspect", "query_logs", "capture_pane",
                             "send_keys", "new_window", "split_pane", "kill"]
                },
                "sessionId": {"type": "string"},
                "command": {"type": "string"},
                "cwd": {"type": "string"},
                "keys": {"type": "string"},
                "cursor": {"type": "string"},
                "lines": {"type": "integer"},
                "vertical": {"type": "boolean"}
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, input: Value) -> Value {
        let action = match required_str(&input, "action") {
            Ok(a) => a.to_string(),
            Err(e) => return e,
        };
        let (root, ws) = match require_workspace(&self.context, "background") {
            Ok(v) => v,
            Err(e) => return e,
        };
        if !can_use_background(&root.to_string_lossy(), &self.context.permissions, &ws) {
            return permission_denied("background");
        }

        match action.as_str() {
            "start" => self.start(&input, &root, &ws).await,
            "list" => self.list(&root).await,
            "inspect" => self.inspect(&input, &root).await,
            "query_logs" => self.query_logs(&input, &root).await,
            "capture_pane" => self.capture_pane(&input, &root).await,
            "send_keys" => self.send_keys(&input, &root, &ws).await,
            "new_window" => self.new_window(&input, &root, &ws).await,
            "split_pane" => self.split_pane(&input, &root, &ws).await,
            "kill" => self.kill(&input, &root).await,
            other => err_detail("Invalid input", format!("unknown action: {other}")),
        }
    }
}
