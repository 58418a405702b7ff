//! Applying a validated patch to the current context.

use crate::context::{AgentContext, TodoProgress};
use crate::policy::Tier;
use crate::sanitize::ContextPatch;
use serde_json::Value;

/// Recursive merge: objects merge key-by-key, everything else (arrays
/// included) replaces the target.
pub fn deep_merge_value(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(t), Value::Object(p)) => {
            for (k, v) in p {
                match t.get_mut(k) {
                    Some(existing) => deep_merge_value(existing, v),
                    None => {
                        t.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (t, p) => *t = p.clone(),
    }
}

/// Merge a sanitized patch into `current`, producing a new context.
///
/// `runtime` and `version` are always carried from `current`; memory tiers
/// merge by id (same id overwrites field-by-field, new ids append); `todo`
/// merges as an object so cursor and progress fields are independently
/// settable.
pub fn merge_context_with_memory_policy(current: &AgentContext, patch: &ContextPatch) -> AgentContext {
    let mut next = current.clone();

    for (key, value) in &patch.top_level {
        merge_top_level_key(&mut next, key, value);
    }

    for tier in Tier::ALL {
        let incoming = patch.memory.get(tier);
        if incoming.is_empty() {
            continue;
        }
        let bucket = next.memory.get_mut(tier);
        for block in incoming {
            match bucket.iter().position(|b| b.id == block.id) {
                Some(idx) => bucket[idx] = block.clone(),
                None => bucket.push(block.clone()),
            }
        }
    }

    if let Some(todo_patch) = &patch.todo {
        let todo = next.todo.get_or_insert_with(TodoProgress::default);
        if let Some(summary) = &todo_patch.summary {
            todo.summary = Some(summary.clone());
        }
        if let Some(total) = todo_patch.total {
            todo.total = Some(total);
        }
        if let Some(step) = todo_patch.step {
            todo.step = Some(step);
        }
        if let Some(cursor) = &todo_patch.cursor {
            todo.cursor = Some(cursor.clone());
        }
    }

    // System-owned fields cannot be overwritten by any patch path.
    next.version = current.version;
    next.runtime = current.runtime.clone();
    next
}

fn merge_top_level_key(next: &mut AgentContext, key: &str, value: &Value) {
    match key {
        "active_task" => match value {
            Value::Null => next.active_task = None,
            Value::String(s) => next.active_task = Some(s.clone()),
            _ => tracing::debug!("ignoring non-string active_task patch"),
        },
        "active_task_meta" => merge_typed_option(&mut next.active_task_meta, value, key),
        "last_task" => merge_typed_option(&mut next.last_task, value, key),
        "task_checkpoint" => merge_typed_option(&mut next.task_checkpoint, value, key),
        "project" => merge_value_option(&mut next.project, value),
        "capabilities" => merge_value_option(&mut next.capabilities, value),
        _ => {
            if value.is_null() {
                next.extra.remove(key);
            } else {
                let slot = next.extra.entry(key.to_string()).or_insert(Value::Null);
                deep_merge_value(slot, value);
            }
        }
    }
}

fn merge_typed_option<T>(slot: &mut Option<T>, value: &Value, key: &str)
where
    T: serde::de::DeserializeOwned + serde::Serialize,
{
    if value.is_null() {
        *slot = None;
        return;
    }
    // Deep-merge over the serialized form so partial records extend the
    // existing one before re-validation.
    let mut base = slot
        .as_ref()
        .and_then(|t| serde_json::to_value(t).ok())
        .unwrap_or(Value::Null);
    if base.is_object() && value.is_object() {
        deep_merge_value(&mut base, value);
    } else {
        base = value.clone();
    }
    match serde_json::from_value::<T>(base) {
        Ok(t) => *slot = Some(t),
        Err(e) => tracing::debug!("ignoring malformed {} patch: {}", key, e),
    }
}

fn merge_value_option(slot: &mut Option<Value>, value: &Value) {
    if value.is_null() {
        *slot = None;
        return;
    }
    match slot {
        Some(existing) => deep_merge_value(existing, value),
        None => *slot = Some(value.clone()),
    }
}
