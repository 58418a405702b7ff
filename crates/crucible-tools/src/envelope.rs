//! Versioned display envelopes for UI rendering of tool calls and results.

use serde::Serialize;
use serde_json::{json, Map, Value};

pub const ENVELOPE_VERSION: u32 = 1;

const PREVIEW_MAX_LINES: usize = 6;
const PREVIEW_MAX_LINE_CHARS: usize = 160;

/// Input/result fields carried through to the envelope verbatim; everything
/// else is preview material.
const IDENTIFYING_FIELDS: [&str; 12] = [
    "filepath",
    "dirpath",
    "command",
    "url",
    "sessionId",
    "source",
    "destination",
    "pattern",
    "action",
    "mode",
    "id",
    "title",
];

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolPhase {
    Call,
    Result,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ToolDisplayEnvelope {
    pub version: u32,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    pub phase: ToolPhase,
    #[serde(rename = "templateKey")]
    pub template_key: String,
    pub data: Value,
}

/// Clip a string to the preview budget, appending `...` when cut.
fn clip_string(s: &str, truncated: &mut bool) -> String {
    let mut lines: Vec<String> = Vec::new();
    for (i, line) in s.lines().enumerate() {
        if i == PREVIEW_MAX_LINES {
            *truncated = true;
            break;
        }
        if line.chars().count() > PREVIEW_MAX_LINE_CHARS {
            *truncated = true;
            let clipped: String = line.chars().take(PREVIEW_MAX_LINE_CHARS).collect();
            lines.push(format!("{clipped}..."));
        } else {
            lines.push(line.to_string());
        }
    }
    lines.join("\n")
}

fn clip_value(value: &Value, truncated: &mut bool) -> Value {
    match value {
        Value::String(s) => Value::String(clip_string(s, truncated)),
        Value::Array(items) => {
            let mut out: Vec<Value> = Vec::new();
            for item in items.iter().take(PREVIEW_MAX_LINES) {
                out.push(clip_value(item, truncated));
            }
            if items.len() > PREVIEW_MAX_LINES {
                *truncated = true;
            }
            Value::Array(out)
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), clip_value(v, truncated));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn build_data(payload: &Value) -> Value {
    let mut truncated = false;
    let mut data = Map::new();

    if let Some(object) = payload.as_object() {
        for field in IDENTIFYING_FIELDS {
            if let Some(v) = object.get(field) {
                // Identifying fields keep their value, clipped only in length.
                data.insert(field.to_string(), clip_value(v, &mut truncated));
            }
        }
        let mut preview = Map::new();
        for (k, v) in object {
            if !IDENTIFYING_FIELDS.contains(&k.as_str()) {
                preview.insert(k.clone(), clip_value(v, &mut truncated));
            }
        }
        if !preview.is_empty() {
            data.insert("preview".to_string(), Value::Object(preview));
        }
    } else {
        data.insert("preview".to_string(), clip_value(payload, &mut truncated));
    }

    if truncated {
        data.insert("truncated".to_string(), Value::Bool(true));
    }
    Value::Object(data)
}

/// Template segment for tools whose rendering depends on the action field.
fn template_segment(tool_name: &str, payload: &Value) -> String {
    let action = payload.get("action").and_then(Value::as_str);
    match (tool_name, action) {
        ("bash", Some("start")) => {
            match payload.get("mode").and_then(Value::as_str) {
                Some("once") | None => "once".to_string(),
                Some(_) => "session_start".to_string(),
            }
        }
        ("bash", Some(action)) => format!("session_{action}"),
        ("background", Some(action)) => action.to_string(),
        _ => String::new(),
    }
}

pub fn build_call_envelope(tool_name: &str, input: &Value) -> ToolDisplayEnvelope {
    let segment = template_segment(tool_name, input);
    let template_key = if segment.is_empty() {
        format!("builtin.{tool_name}.call")
    } else {
        format!("builtin.{tool_name}.{segment}.call")
    };
    ToolDisplayEnvelope {
        version: ENVELOPE_VERSION,
        tool_name: tool_name.to_string(),
        phase: ToolPhase::Call,
        template_key,
        data: build_data(input),
    }
}

pub fn build_result_envelope(tool_name: &str, input: &Value, result: &Value) -> ToolDisplayEnvelope {
    let segment = template_segment(tool_name, input);
    let template_key = if segment.is_empty() {
        format!("builtin.{tool_name}.result")
    } else {
        format!("builtin.{tool_name}.{segment}.result")
    };
    ToolDisplayEnvelope {
        version: ENVELOPE_VERSION,
        tool_name: tool_name.to_string(),
        phase: ToolPhase::Result,
        template_key,
        data: build_data(result),
    }
}

/// Compact summary of a payload for telemetry events.
pub fn summarize_payload(payload: &Value) -> Value {
    let mut truncated = false;
    let clipped = clip_value(payload, &mut truncated);
    if truncated {
        json!({"summary": clipped, "truncated": true})
    } else {
        clipped
    }
}
