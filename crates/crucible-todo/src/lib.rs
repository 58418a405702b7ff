//! Crucible Todo - workspace task store with an append-only event log
//!
//! One embedded relational file per workspace at `{workspace}/.agent/todo.db`.
//! Store handles are opened per operation and released on return; every
//! mutation runs in a transaction and appends exactly one event row.

pub mod progress;
pub mod store;

pub use progress::{compute_todo_progress_from_items, TodoProgressContext};
pub use store::{
    cleanup_todo_db_on_startup, EventActor, TodoEvent, TodoItem, TodoStatus, TodoStore,
};
