//! Tool trait, registry, and the uniform execution wrapper.

use crate::context::{CallMetadata, TelemetryEvent, ToolExecutionContext, ToolSettled};
use crate::envelope::{build_call_envelope, build_result_envelope, summarize_payload};
use crucible_core::{Error, Result};
use crucible_llm::ToolSpec;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The Tool trait. Tools never throw for normal failure modes: every
/// expected failure is a plain `{error, ...}` record in the reply.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Stable tool name (e.g. "read", "bash", "todo_add").
    fn name(&self) -> &str;

    /// Human-readable description sent to the model.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Execute the tool. Returns a success record or `{error, detail?}`.
    async fn execute(&self, input: Value) -> Value;

    /// Execute with cancellation support. Default: race execute() against
    /// cancellation. Tools that manage child processes override this to kill
    /// the process on cancellation.
    async fn execute_cancellable(&self, input: Value, cancel: CancellationToken) -> Value {
        tokio::select! {
            result = self.execute(input) => result,
            _ = cancel.cancelled() => json!({"error": "cancelled"}),
        }
    }

    fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Derive the error message from a tool reply, in priority order: an `error`
/// string, a non-string `error` (summarized), then the failure flags
/// `isError === true | ok === false | success === false` with a
/// message/text/content[] fallback.
pub fn error_message_from_reply(reply: &Value) -> Option<String> {
    match reply.get("error") {
        Some(Value::String(message)) => return Some(message.clone()),
        Some(Value::Null) | None => {}
        Some(other) => return Some(summarize_payload(other).to_string()),
    }

    let failed = reply.get("isError") == Some(&Value::Bool(true))
        || reply.get("ok") == Some(&Value::Bool(false))
        || reply.get("success") == Some(&Value::Bool(false));
    if !failed {
        return None;
    }

    for key in ["message", "text"] {
        if let Some(Value::String(s)) = reply.get(key) {
            return Some(s.clone());
        }
    }
    if let Some(Value::Array(content)) = reply.get("content") {
        let joined: Vec<String> = content
            .iter()
            .filter_map(|c| match c {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("text").and_then(Value::as_str).map(String::from),
                _ => None,
            })
            .collect();
        if !joined.is_empty() {
            return Some(joined.join("\n"));
        }
    }
    Some("tool reported failure".to_string())
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    context: Arc<ToolExecutionContext>,
}

impl ToolRegistry {
    pub fn new(context: Arc<ToolExecutionContext>) -> Self {
        Self {
            tools: HashMap::new(),
            context,
        }
    }

    pub fn context(&self) -> &Arc<ToolExecutionContext> {
        &self.context
    }

    /// Register a builtin tool. Replaces any existing tool with the same
    /// name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Merge external (e.g. MCP) tools into the registry. A name collision
    /// with a builtin is a fatal construction error; builtins keep their
    /// slot.
    pub fn merge_external(&mut self, external: Vec<Arc<dyn Tool>>) -> Result<()> {
        for tool in &external {
            if self.tools.contains_key(tool.name()) {
                return Err(Error::Internal(format!(
                    "external tool name collides with builtin: {}",
                    tool.name()
                )));
            }
        }
        for tool in external {
            self.register_arc(tool);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Tool definitions for the model.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.to_spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    fn emit(&self, event: TelemetryEvent) {
        if let Some(telemetry) = &self.context.telemetry {
            telemetry.emit(event);
        }
    }

    /// The uniform wrapper around every tool execution.
    ///
    /// Only the typed budget rejection propagates as an error; every other
    /// failure mode stays inside the returned record.
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        meta: CallMetadata,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let Some(tool) = self.tools.get(name) else {
            return Ok(json!({"error": format!("Tool not found: {name}")}));
        };

        if let Some(budget) = &self.context.tool_budget {
            budget.consume(name)?;
        }

        self.emit(TelemetryEvent {
            kind: "tool.call",
            tool_name: name.to_string(),
            tool_call_id: meta.tool_call_id.clone(),
            summary: summarize_payload(&input),
            envelope: build_call_envelope(name, &input),
        });
        debug!(tool = name, "executing tool");

        let result = tool.execute_cancellable(input.clone(), cancel).await;
        let error = error_message_from_reply(&result);

        self.emit(TelemetryEvent {
            kind: "tool.result",
            tool_name: name.to_string(),
            tool_call_id: meta.tool_call_id,
            summary: summarize_payload(&result),
            envelope: build_result_envelope(name, &input, &result),
        });

        if let Some(observer) = &self.context.persistent_memory {
            observer.observe_tool_result(name, &result);
        }

        if let Some(hook) = &self.context.on_tool_execution_settled {
            let settled = ToolSettled {
                tool_name: name.to_string(),
                input,
                ok: error.is_none(),
                result: result.clone(),
                error: error.clone(),
            };
            if let Err(e) = hook(&settled) {
                warn!(tool = name, "onToolExecutionSettled hook failed: {e}");
            }
        }

        Ok(result)
    }
}
