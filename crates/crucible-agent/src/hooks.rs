//! Persistent-memory hooks firing around each task.

use crate::session::Session;
use crucible_core::Result;
use serde_json::Value;

/// Outcome summary handed to `after_task` on every exit path.
#[derive(Clone, Debug)]
pub struct TaskHookOutcome {
    pub completed: bool,
    /// "detailed" or "stream".
    pub mode: &'static str,
    pub finish_reason: Option<String>,
    pub stop_reason: Option<String>,
}

/// Hook errors never abort a task; the runner logs and moves on.
#[async_trait::async_trait]
pub trait PersistentMemoryHooks: Send + Sync {
    async fn before_task(&self, _session: &mut Session, _meta: Option<&Value>) -> Result<()> {
        Ok(())
    }

    async fn after_task(&self, _session: &mut Session, _outcome: &TaskHookOutcome) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMemoryHooks;

#[async_trait::async_trait]
impl PersistentMemoryHooks for NoopMemoryHooks {}
