//! Execution configuration for the task runner.

use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct AgentExecutionConfig {
    /// Model steps granted to a single segment.
    pub max_model_steps_per_run: u32,
    /// Hard cap on model steps across every segment of one task.
    pub max_model_steps_per_task: u32,
    /// Whether a step-limited segment rolls into an internal continuation.
    pub auto_continue_on_step_limit: bool,
    /// How many continuation runs one task may consume.
    pub max_continuation_runs: u32,
    /// Optional per-tool call budget for the task.
    pub tool_budget: Option<HashMap<String, u32>>,
}

impl Default for AgentExecutionConfig {
    fn default() -> Self {
        Self {
            max_model_steps_per_run: 10,
            max_model_steps_per_task: 40,
            auto_continue_on_step_limit: true,
            max_continuation_runs: 3,
            tool_budget: None,
        }
    }
}
