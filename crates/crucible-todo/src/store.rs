//! The embedded store: `{workspace}/.agent/todo.db`.

use crate::progress::{compute_todo_progress_from_items, TodoProgressContext};
use crucible_core::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const DB_FILENAME: &str = "todo.db";
const DB_SIDECARS: [&str; 3] = ["todo.db-wal", "todo.db-shm", "todo.db-journal"];

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TodoStatus {
    Open,
    Done,
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventActor {
    Agent,
    System,
}

impl EventActor {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoItem {
    pub id: i64,
    pub title: String,
    pub note: String,
    pub status: TodoStatus,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
    #[serde(rename = "completedAt")]
    pub completed_at: Option<i64>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TodoEvent {
    pub id: i64,
    pub todo_id: Option<i64>,
    pub event_type: String,
    pub actor: String,
    pub tool_name: Option<String>,
    pub payload_json: String,
    pub created_at: i64,
}

/// Outcome of one mutating operation: the affected rows plus the progress
/// snapshot computed over the post-state item list.
#[derive(Clone, Debug)]
pub struct TodoMutation {
    pub items: Vec<TodoItem>,
    pub progress: TodoProgressContext,
}

pub struct TodoStore {
    conn: Connection,
}

fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(".agent").join(DB_FILENAME)
}

/// Removes the store file and its sidecars. Runs once at session start;
/// concurrent access during startup is not supported.
pub fn cleanup_todo_db_on_startup(workspace: &Path) -> Result<()> {
    let dir = workspace.join(".agent");
    for name in std::iter::once(DB_FILENAME).chain(DB_SIDECARS) {
        let path = dir.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::IoError(e)),
        }
    }
    Ok(())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl TodoStore {
    /// Open (creating if needed) the workspace store. One handle per
    /// operation; release by dropping.
    pub fn open(workspace: &Path) -> Result<Self> {
        let dir = workspace.join(".agent");
        std::fs::create_dir_all(&dir)?;
        let conn = Connection::open(db_path(workspace))
            .map_err(|e| Error::store_error(format!("open todo.db: {e}")))?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS todo_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    note TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL CHECK(status IN ('open','done')),
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    completed_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_todo_items_status ON todo_items(status);
                CREATE TABLE IF NOT EXISTS todo_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    todo_id INTEGER,
                    event_type TEXT NOT NULL,
                    actor TEXT NOT NULL CHECK(actor IN ('agent','system')),
                    tool_name TEXT,
                    payload_json TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_todo_events_todo_id ON todo_events(todo_id);
                CREATE INDEX IF NOT EXISTS idx_todo_events_event_type ON todo_events(event_type);
                CREATE INDEX IF NOT EXISTS idx_todo_events_created_at ON todo_events(created_at);",
            )
            .map_err(|e| Error::store_error(format!("ensure schema: {e}")))
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<TodoItem> {
        let status: String = row.get(3)?;
        Ok(TodoItem {
            id: row.get(0)?,
            title: row.get(1)?,
            note: row.get(2)?,
            status: TodoStatus::parse(&status).unwrap_or(TodoStatus::Open),
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            completed_at: row.get(6)?,
        })
    }

    fn all_items(conn: &Connection) -> Result<Vec<TodoItem>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, title, note, status, created_at, updated_at, completed_at
                 FROM todo_items ORDER BY id ASC",
            )
            .map_err(store_err)?;
        let items = stmt
            .query_map([], Self::row_to_item)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(items)
    }

    fn item_by_id(conn: &Connection, id: i64) -> Result<Option<TodoItem>> {
        conn.query_row(
            "SELECT id, title, note, status, created_at, updated_at, completed_at
             FROM todo_items WHERE id = ?1",
            params![id],
            Self::row_to_item,
        )
        .optional()
        .map_err(store_err)
    }

    fn append_event(
        conn: &Connection,
        todo_id: Option<i64>,
        event_type: &str,
        actor: EventActor,
        tool_name: Option<&str>,
        input: Value,
        before: Option<&TodoItem>,
        after: Option<&TodoItem>,
        removed_items: Option<&[TodoItem]>,
        progress: &TodoProgressContext,
    ) -> Result<()> {
        let mut payload = json!({
            "v": 1,
            "input": input,
            "before": before,
            "after": after,
            "progress": progress,
        });
        if let Some(removed) = removed_items {
            payload["removedItems"] = serde_json::to_value(removed)?;
        }
        conn.execute(
            "INSERT INTO todo_events (todo_id, event_type, actor, tool_name, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                todo_id,
                event_type,
                actor.as_str(),
                tool_name,
                payload.to_string(),
                now_ms()
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Items ordered by id; optional status filter and row limit.
    pub fn list(&self, status: Option<TodoStatus>, limit: Option<u32>) -> Result<Vec<TodoItem>> {
        let mut items = Self::all_items(&self.conn)?;
        if let Some(status) = status {
            items.retain(|i| i.status == status);
        }
        if let Some(limit) = limit {
            items.truncate(limit as usize);
        }
        Ok(items)
    }

    pub fn progress(&self) -> Result<TodoProgressContext> {
        Ok(compute_todo_progress_from_items(&Self::all_items(&self.conn)?))
    }

    pub fn add(
        &mut self,
        title: &str,
        note: Option<&str>,
        actor: EventActor,
        tool_name: Option<&str>,
    ) -> Result<TodoMutation> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::invalid_input("title must be non-empty"));
        }
        let note = note.unwrap_or("");
        let now = now_ms();

        let tx = self.conn.transaction().map_err(store_err)?;
        tx.execute(
            "INSERT INTO todo_items (title, note, status, created_at, updated_at, completed_at)
             VALUES (?1, ?2, 'open', ?3, ?3, NULL)",
            params![title, note, now],
        )
        .map_err(store_err)?;
        let id = tx.last_insert_rowid();
        let after = Self::item_by_id(&tx, id)?.ok_or_else(|| Error::store_error("inserted row vanished"))?;
        let progress = compute_todo_progress_from_items(&Self::all_items(&tx)?);
        Self::append_event(
            &tx,
            Some(id),
            "add",
            actor,
            tool_name,
            json!({"title": title, "note": note}),
            None,
            Some(&after),
            None,
            &progress,
        )?;
        tx.commit().map_err(store_err)?;

        Ok(TodoMutation {
            items: vec![after],
            progress,
        })
    }

    pub fn update(
        &mut self,
        id: i64,
        title: Option<&str>,
        note: Option<&str>,
        actor: EventActor,
        tool_name: Option<&str>,
    ) -> Result<TodoMutation> {
        if title.is_none() && note.is_none() {
            return Err(Error::invalid_input("update requires title or note"));
        }
        if let Some(title) = title {
            if title.trim().is_empty() {
                return Err(Error::invalid_input("title must be non-empty"));
            }
        }

        let tx = self.conn.transaction().map_err(store_err)?;
        let before = Self::item_by_id(&tx, id)?
            .ok_or_else(|| Error::store_error(format!("todo item {id} not found")))?;

        let new_title = title.map(str::trim).unwrap_or(before.title.as_str());
        let new_note = note.unwrap_or(before.note.as_str());
        tx.execute(
            "UPDATE todo_items SET title = ?1, note = ?2, updated_at = ?3 WHERE id = ?4",
            params![new_title, new_note, now_ms(), id],
        )
        .map_err(store_err)?;

        let after = Self::item_by_id(&tx, id)?.ok_or_else(|| Error::store_error("updated row vanished"))?;
        let progress = compute_todo_progress_from_items(&Self::all_items(&tx)?);
        Self::append_event(
            &tx,
            Some(id),
            "update",
            actor,
            tool_name,
            json!({"id": id, "title": title, "note": note}),
            Some(&before),
            Some(&after),
            None,
            &progress,
        )?;
        tx.commit().map_err(store_err)?;

        Ok(TodoMutation {
            items: vec![after],
            progress,
        })
    }

    /// Flip the done flag. Idempotent: completing a done item or reopening an
    /// open one only refreshes `updated_at`. `completed_at` is set on first
    /// completion and cleared on reopen.
    pub fn set_done(
        &mut self,
        id: i64,
        done: bool,
        actor: EventActor,
        tool_name: Option<&str>,
    ) -> Result<TodoMutation> {
        let tx = self.conn.transaction().map_err(store_err)?;
        let before = Self::item_by_id(&tx, id)?
            .ok_or_else(|| Error::store_error(format!("todo item {id} not found")))?;
        let now = now_ms();

        if done {
            let completed_at = before.completed_at.unwrap_or(now);
            tx.execute(
                "UPDATE todo_items SET status = 'done', completed_at = ?1, updated_at = ?2 WHERE id = ?3",
                params![completed_at, now, id],
            )
            .map_err(store_err)?;
        } else {
            tx.execute(
                "UPDATE todo_items SET status = 'open', completed_at = NULL, updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )
            .map_err(store_err)?;
        }

        let after = Self::item_by_id(&tx, id)?.ok_or_else(|| Error::store_error("updated row vanished"))?;
        let progress = compute_todo_progress_from_items(&Self::all_items(&tx)?);
        Self::append_event(
            &tx,
            Some(id),
            if done { "complete" } else { "reopen" },
            actor,
            tool_name,
            json!({"id": id, "done": done}),
            Some(&before),
            Some(&after),
            None,
            &progress,
        )?;
        tx.commit().map_err(store_err)?;

        Ok(TodoMutation {
            items: vec![after],
            progress,
        })
    }

    /// Delete one item, returning the removed snapshot.
    pub fn remove(
        &mut self,
        id: i64,
        actor: EventActor,
        tool_name: Option<&str>,
    ) -> Result<TodoMutation> {
        let tx = self.conn.transaction().map_err(store_err)?;
        let before = Self::item_by_id(&tx, id)?
            .ok_or_else(|| Error::store_error(format!("todo item {id} not found")))?;
        tx.execute("DELETE FROM todo_items WHERE id = ?1", params![id])
            .map_err(store_err)?;

        let progress = compute_todo_progress_from_items(&Self::all_items(&tx)?);
        Self::append_event(
            &tx,
            Some(id),
            "remove",
            actor,
            tool_name,
            json!({"id": id}),
            Some(&before),
            None,
            None,
            &progress,
        )?;
        tx.commit().map_err(store_err)?;

        Ok(TodoMutation {
            items: vec![before],
            progress,
        })
    }

    /// Delete every done item, returning the deleted list.
    pub fn clear_done(
        &mut self,
        actor: EventActor,
        tool_name: Option<&str>,
    ) -> Result<TodoMutation> {
        let tx = self.conn.transaction().map_err(store_err)?;
        let removed: Vec<TodoItem> = Self::all_items(&tx)?
            .into_iter()
            .filter(|i| i.status == TodoStatus::Done)
            .collect();
        tx.execute("DELETE FROM todo_items WHERE status = 'done'", [])
            .map_err(store_err)?;

        let progress = compute_todo_progress_from_items(&Self::all_items(&tx)?);
        Self::append_event(
            &tx,
            None,
            "clear_done",
            actor,
            tool_name,
            json!({}),
            None,
            None,
            Some(&removed),
            &progress,
        )?;
        tx.commit().map_err(store_err)?;

        Ok(TodoMutation {
            items: removed,
            progress,
        })
    }

    /// All event rows in id order; the log is append-only.
    pub fn events(&self) -> Result<Vec<TodoEvent>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, todo_id, event_type, actor, tool_name, payload_json, created_at
                 FROM todo_events ORDER BY id ASC",
            )
            .map_err(store_err)?;
        let events = stmt
            .query_map([], |row| {
                Ok(TodoEvent {
                    id: row.get(0)?,
                    todo_id: row.get(1)?,
                    event_type: row.get(2)?,
                    actor: row.get(3)?,
                    tool_name: row.get(4)?,
                    payload_json: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(events)
    }
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::store_error(e.to_string())
}
