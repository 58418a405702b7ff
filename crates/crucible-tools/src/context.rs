//! The ambient context every tool call executes against.

use crate::envelope::ToolDisplayEnvelope;
use crucible_core::{Error, Result};
use crucible_policy::PermissionRules;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Per-call metadata handed in by the executor.
#[derive(Clone, Debug, Default)]
pub struct CallMetadata {
    pub tool_call_id: Option<String>,
}

/// Where tool output messages originate for UI purposes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputMessageSource {
    SdkHooks,
    #[default]
    RegistryWrapper,
}

/// Telemetry emitted around every tool call.
#[derive(Clone, Debug)]
pub struct TelemetryEvent {
    /// `tool.call` or `tool.result`.
    pub kind: &'static str,
    pub tool_name: String,
    pub tool_call_id: Option<String>,
    pub summary: Value,
    pub envelope: ToolDisplayEnvelope,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Settled notification payload for the user-supplied hook.
#[derive(Clone, Debug)]
pub struct ToolSettled {
    pub tool_name: String,
    pub input: Value,
    pub ok: bool,
    pub result: Value,
    pub error: Option<String>,
}

pub type SettledHook =
    Arc<dyn Fn(&ToolSettled) -> std::result::Result<(), String> + Send + Sync>;

/// Ambient scheduling service; absent in most installations.
pub trait ScheduleGateway: Send + Sync {
    fn submit(&self, spec: Value) -> Result<Value>;
}

/// Seam for installations that persist memory outside the session context.
pub trait PersistentMemoryCoordinator: Send + Sync {
    fn observe_tool_result(&self, tool_name: &str, result: &Value);
}

/// Per-task call budget, keyed by tool name. Tools without an entry are
/// unlimited. Consumption is an atomic compare-and-decrement.
#[derive(Debug, Default)]
pub struct ToolBudget {
    limits: HashMap<String, u32>,
    used: HashMap<String, AtomicU32>,
}

impl ToolBudget {
    pub fn new(limits: HashMap<String, u32>) -> Self {
        let used = limits.keys().map(|k| (k.clone(), AtomicU32::new(0))).collect();
        Self { limits, used }
    }

    /// Consume one unit; rejects with the typed budget error when exhausted.
    pub fn consume(&self, tool_name: &str) -> Result<()> {
        let Some(&limit) = self.limits.get(tool_name) else {
            return Ok(());
        };
        let counter = self.used.get(tool_name).expect("counter for limited tool");
        let mut current = counter.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return Err(Error::ToolBudgetExceeded {
                    tool_name: tool_name.to_string(),
                    used: current,
                    remaining: 0,
                    limit,
                });
            }
            match counter.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    pub fn usage(&self, tool_name: &str) -> Option<(u32, u32, u32)> {
        let &limit = self.limits.get(tool_name)?;
        let used = self
            .used
            .get(tool_name)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0);
        Some((used, limit.saturating_sub(used), limit))
    }
}

/// Everything a tool closes over for one task: workspace, permission rules,
/// budget, and the telemetry seams. Read-only during execution except the
/// budget counters.
#[derive(Default)]
pub struct ToolExecutionContext {
    pub workspace: Option<PathBuf>,
    pub permissions: PermissionRules,
    pub tool_budget: Option<ToolBudget>,
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
    pub on_tool_execution_settled: Option<SettledHook>,
    pub tool_output_message_source: OutputMessageSource,
    pub schedule_gateway: Option<Arc<dyn ScheduleGateway>>,
    pub persistent_memory: Option<Arc<dyn PersistentMemoryCoordinator>>,
}

impl ToolExecutionContext {
    pub fn for_workspace(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: Some(workspace.into()),
            ..Default::default()
        }
    }

    /// Workspace as a string with a trailing separator, the form policy
    /// checks expect.
    pub fn workspace_str(&self) -> Option<String> {
        self.workspace.as_ref().map(|w| {
            let s = w.to_string_lossy().into_owned();
            if s.ends_with('/') {
                s
            } else {
                format!("{s}/")
            }
        })
    }
}
