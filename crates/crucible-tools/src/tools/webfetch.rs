//! Webfetch tool: http/https GET with policy-gated URLs.

use super::{err, require_workspace, required_str};
use crate::context::ToolExecutionContext;
use crate::registry::Tool;
use crucible_policy::can_visit_url;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const MAX_BODY_CHARS: usize = 100_000;

pub struct WebfetchTool {
    context: Arc<ToolExecutionContext>,
}

impl WebfetchTool {
    pub fn new(context: Arc<ToolExecutionContext>) -> Self {
        Self { context }
    }
}

#[async_trait::async_trait]
impl Tool for WebfetchTool {
    fn name(&self) -> &str {
        "webfetch"
    }

    fn description(&self) -> &str {
        "Fetch an http or https URL and return the response body as text."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL to fetch"},
                "timeoutMs": {"type": "integer", "description": "Request timeout (default 30000)"}
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> Value {
        let url = match required_str(&input, "url") {
            Ok(u) => u,
            Err(e) => return e,
        };
        let (_root, ws) = match require_workspace(&self.context, "webfetch") {
            Ok(v) => v,
            Err(e) => return e,
        };
        if !can_visit_url(url, &self.context.permissions, &ws) {
            return err("Permission denied: URL not allowed");
        }

        let timeout_ms = input
            .get("timeoutMs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
        {
            Ok(c) => c,
            Err(e) => return err(format!("Failed to build http client: {e}")),
        };

        debug!("webfetch: {}", url);
        let response = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return err(format!("Request failed: {e}")),
        };
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return err(format!("Failed to read body: {e}")),
        };

        let truncated = body.chars().count() > MAX_BODY_CHARS;
        let content: String = if truncated {
            body.chars().take(MAX_BODY_CHARS).collect()
        } else {
            body
        };

        let mut reply = json!({
            "url": url,
            "status": status,
            "content": content,
        });
        if let Some(content_type) = content_type {
            reply["contentType"] = Value::String(content_type);
        }
        if truncated {
            reply["truncated"] = Value::Bool(true);
        }
        reply
    }
}
