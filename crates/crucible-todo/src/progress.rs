//! Progress derivation over the ordered item list.

use crate::store::{TodoItem, TodoStatus};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoProgressContext {
    pub summary: String,
    pub total: u64,
    pub step: u64,
}

/// Derive the progress snapshot from items ordered by id.
///
/// `step` is the ordinal position of the first open item, not its id; ids
/// keep gaps after `clear_done` while positions stay dense.
pub fn compute_todo_progress_from_items(items: &[TodoItem]) -> TodoProgressContext {
    let total = items.len() as u64;
    if total == 0 {
        return TodoProgressContext {
            summary: "暂无TODO".to_string(),
            total: 0,
            step: 0,
        };
    }

    let done = items.iter().filter(|i| i.status == TodoStatus::Done).count() as u64;
    let first_open = items.iter().position(|i| i.status == TodoStatus::Open);

    let Some(first_open) = first_open else {
        return TodoProgressContext {
            summary: format!("已完成 {done}/{total}"),
            total,
            step: total,
        };
    };

    let step = first_open as u64 + 1;
    let skipped = items[first_open..]
        .iter()
        .any(|i| i.status == TodoStatus::Done);
    let marker = if skipped { "，存在跳步" } else { "" };
    TodoProgressContext {
        summary: format!("进行中 {done}/{total}（当前第{step}步{marker}）"),
        total,
        step,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, status: TodoStatus) -> TodoItem {
        TodoItem {
            id,
            title: format!("task {id}"),
            note: String::new(),
            status,
            created_at: 0,
            updated_at: 0,
            completed_at: None,
        }
    }

    #[test]
    fn empty_list() {
        let progress = compute_todo_progress_from_items(&[]);
        assert_eq!(progress.summary, "暂无TODO");
        assert_eq!((progress.total, progress.step), (0, 0));
    }

    #[test]
    fn all_done() {
        let items = [item(1, TodoStatus::Done), item(2, TodoStatus::Done)];
        let progress = compute_todo_progress_from_items(&items);
        assert_eq!(progress.summary, "已完成 2/2");
        assert_eq!((progress.total, progress.step), (2, 2));
    }

    #[test]
    fn in_progress_points_at_first_open() {
        let items = [
            item(1, TodoStatus::Done),
            item(2, TodoStatus::Open),
            item(3, TodoStatus::Open),
        ];
        let progress = compute_todo_progress_from_items(&items);
        assert_eq!(progress.summary, "进行中 1/3（当前第2步）");
        assert_eq!(progress.step, 2);
    }

    #[test]
    fn skipped_completion_is_flagged() {
        let items = [
            item(1, TodoStatus::Open),
            item(2, TodoStatus::Done),
            item(3, TodoStatus::Open),
        ];
        let progress = compute_todo_progress_from_items(&items);
        assert_eq!(progress.summary, "进行中 1/3（当前第1步，存在跳步）");
    }

    #[test]
    fn step_uses_position_not_id() {
        // Ids with gaps, e.g. after clear_done.
        let items = [item(7, TodoStatus::Done), item(12, TodoStatus::Open)];
        let progress = compute_todo_progress_from_items(&items);
        assert_eq!(progress.step, 2);
    }
}
