//! Validation of incoming context patches.
//!
//! Untrusted input (model-emitted `context_patch` objects, tool outputs) is
//! validated into the closed `ContextPatch` sum before any merge happens.
//! System-owned keys (`runtime`, `version`) never pass through; `memory` and
//! `todo` are normalized field by field and invalid records are discarded,
//! not fatal.

use crate::block::{
    prefer_incoming, truncate_chars, BlockStatus, MemoryBlock, MAX_CONTENT_CHARS, MAX_TAGS,
    MAX_TAG_CHARS,
};
use crate::context::{AgentContext, TodoCursor, TodoCursorNext, TodoCursorPhase};
use crate::policy::Tier;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const MAX_CURSOR_NOTE_CHARS: usize = 120;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PatchSource {
    #[default]
    Model,
    System,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct MemoryPatch {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub core: Vec<MemoryBlock>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub working: Vec<MemoryBlock>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ephemeral: Vec<MemoryBlock>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub longterm: Vec<MemoryBlock>,
}

impl MemoryPatch {
    pub fn get(&self, tier: Tier) -> &[MemoryBlock] {
        match tier {
            Tier::Core => &self.core,
            Tier::Working => &self.working,
            Tier::Ephemeral => &self.ephemeral,
            Tier::Longterm => &self.longterm,
        }
    }

    fn get_mut(&mut self, tier: Tier) -> &mut Vec<MemoryBlock> {
        match tier {
            Tier::Core => &mut self.core,
            Tier::Working => &mut self.working,
            Tier::Ephemeral => &mut self.ephemeral,
            Tier::Longterm => &mut self.longterm,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
            && self.working.is_empty()
            && self.ephemeral.is_empty()
            && self.longterm.is_empty()
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct TodoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<TodoCursor>,
}

impl TodoPatch {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.total.is_none() && self.step.is_none() && self.cursor.is_none()
    }
}

/// The closed patch sum: validated memory entries, a validated todo patch,
/// and pass-through top-level keys for deep-merging.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContextPatch {
    pub memory: MemoryPatch,
    pub todo: Option<TodoPatch>,
    pub top_level: BTreeMap<String, Value>,
}

impl ContextPatch {
    /// Re-encodes the patch in the incoming wire shape, so a sanitized patch
    /// can be sanitized again (idempotence) or logged.
    pub fn to_patch_value(&self) -> Value {
        let mut map = Map::new();
        if !self.memory.is_empty() {
            map.insert(
                "memory".into(),
                serde_json::to_value(&self.memory).unwrap_or(Value::Null),
            );
        }
        if let Some(todo) = &self.todo {
            map.insert(
                "todo".into(),
                serde_json::to_value(todo).unwrap_or(Value::Null),
            );
        }
        for (k, v) in &self.top_level {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

/// Validate an incoming patch against the current context.
///
/// `runtime`, `version` and (raw) `memory` never pass through as top-level
/// keys; memory tiers are rebuilt from normalized blocks, deduplicated by id
/// under the quality ordering.
pub fn sanitize_incoming_context_patch(
    input: &Value,
    current: &AgentContext,
    source: PatchSource,
) -> ContextPatch {
    let mut patch = ContextPatch::default();
    let Some(object) = input.as_object() else {
        return patch;
    };

    for (key, value) in object {
        match key.as_str() {
            // System-owned: silently dropped.
            "runtime" | "version" => {}
            "memory" => sanitize_memory(value, current, &mut patch.memory),
            "todo" => {
                let todo = sanitize_todo(value, current, source);
                if !todo.is_empty() {
                    patch.todo = Some(todo);
                }
            }
            _ => {
                patch.top_level.insert(key.clone(), value.clone());
            }
        }
    }
    patch
}

fn sanitize_memory(value: &Value, current: &AgentContext, out: &mut MemoryPatch) {
    let Some(tiers) = value.as_object() else {
        return;
    };
    for tier in Tier::ALL {
        let Some(entries) = tiers.get(tier.as_str()).and_then(Value::as_array) else {
            continue;
        };
        let bucket = out.get_mut(tier);
        for entry in entries {
            let Some(block) = normalize_memory_block(entry, current.runtime.round, tier) else {
                tracing::debug!(tier = tier.as_str(), "discarding invalid memory block");
                continue;
            };
            match bucket.iter().position(|b| b.id == block.id) {
                Some(idx) if prefer_incoming(&bucket[idx], &block) => bucket[idx] = block,
                Some(_) => {}
                None => bucket.push(block),
            }
        }
    }
}

/// Coerce one raw entry into a `MemoryBlock`. Returns `None` when the record
/// cannot be salvaged (missing id/type/content).
pub fn normalize_memory_block(value: &Value, current_round: u64, tier: Tier) -> Option<MemoryBlock> {
    let object = value.as_object()?;

    let id = non_empty_string(object.get("id"))?;
    let block_type = non_empty_string(object.get("type"))?;
    let content = non_empty_string(object.get("content"))?;
    let content = truncate_chars(&content, MAX_CONTENT_CHARS);

    let decay = clamp_unit(number_or(object.get("decay"), 0.0));
    let confidence = clamp_unit(number_or(object.get("confidence"), 0.5));

    let round = object
        .get("round")
        .and_then(Value::as_u64)
        .filter(|r| *r >= 1)
        .unwrap_or(current_round)
        .min(current_round.max(1));

    let tags = object
        .get("tags")
        .and_then(Value::as_array)
        .map(|raw| normalize_tags(raw))
        .unwrap_or_default();

    let mut status = object
        .get("status")
        .and_then(Value::as_str)
        .and_then(BlockStatus::parse);
    if status.is_none() && tier == Tier::Working {
        status = Some(BlockStatus::Open);
    }

    Some(MemoryBlock {
        id,
        block_type,
        decay,
        confidence,
        round,
        tags,
        content,
        status,
    })
}

fn normalize_tags(raw: &[Value]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for value in raw {
        let Some(tag) = value.as_str() else { continue };
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        let tag = truncate_chars(tag, MAX_TAG_CHARS);
        if !tags.contains(&tag) {
            tags.push(tag);
        }
        if tags.len() == MAX_TAGS {
            break;
        }
    }
    tags
}

fn sanitize_todo(value: &Value, current: &AgentContext, source: PatchSource) -> TodoPatch {
    let mut out = TodoPatch::default();
    let Some(object) = value.as_object() else {
        return out;
    };

    if source == PatchSource::System {
        out.summary = object
            .get("summary")
            .and_then(Value::as_str)
            .map(String::from);
        out.total = object.get("total").and_then(non_negative_int);
        if let Some(step) = object.get("step").and_then(non_negative_int) {
            let total = out
                .total
                .or_else(|| current.todo.as_ref().and_then(|t| t.total))
                .unwrap_or(0);
            out.step = Some(step.min(total));
        }
    }

    if let Some(cursor) = object.get("cursor") {
        out.cursor = sanitize_todo_cursor(cursor);
    }
    out
}

/// Strict cursor shape check. Any violation discards the entire cursor.
pub fn sanitize_todo_cursor(value: &Value) -> Option<TodoCursor> {
    let object = value.as_object()?;

    for key in object.keys() {
        if !matches!(key.as_str(), "v" | "phase" | "next" | "targetId" | "note") {
            return None;
        }
    }

    if object.get("v").and_then(Value::as_u64) != Some(1) {
        return None;
    }

    let phase = match object.get("phase").and_then(Value::as_str)? {
        "planning" => TodoCursorPhase::Planning,
        "doing" => TodoCursorPhase::Doing,
        "verifying" => TodoCursorPhase::Verifying,
        "blocked" => TodoCursorPhase::Blocked,
        _ => return None,
    };

    let next = match object.get("next").and_then(Value::as_str)? {
        "none" => TodoCursorNext::None,
        "todo_list" => TodoCursorNext::TodoList,
        "todo_add" => TodoCursorNext::TodoAdd,
        "todo_clear_done" => TodoCursorNext::TodoClearDone,
        "todo_complete" => TodoCursorNext::TodoComplete,
        "todo_reopen" => TodoCursorNext::TodoReopen,
        "todo_update" => TodoCursorNext::TodoUpdate,
        "todo_remove" => TodoCursorNext::TodoRemove,
        _ => return None,
    };

    let target_id = match object.get("targetId") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_u64() {
            Some(id) if id >= 1 => Some(id),
            _ => return None,
        },
    };

    // Item-addressing next-actions require a target; the rest forbid one.
    if next.requires_target() != target_id.is_some() {
        return None;
    }

    let note = match object.get("note") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(truncate_chars(trimmed, MAX_CURSOR_NOTE_CHARS))
            }
        }
        Some(_) => return None,
    };

    Some(TodoCursor {
        v: 1,
        phase,
        next,
        target_id,
        note,
    })
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn number_or(value: Option<&Value>, default: f64) -> f64 {
    value.and_then(Value::as_f64).unwrap_or(default)
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, 1.0)
}

fn non_negative_int(value: &Value) -> Option<u64> {
    value
        .as_f64()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.floor() as u64)
}
