//! Projection: raw context -> injected context -> model context.

use crate::compact::{compact_raw_for_storage, compact_tier, CompactionMode, TierCompactOptions};
use crate::context::AgentContext;
use crate::model_context::{to_model_context_v2, ModelContextV2};
use crate::policy::Tier;
use serde::Serialize;
use std::collections::BTreeMap;

pub use crate::compact::{DropReason, DroppedSample};

const MAX_DROPPED_SAMPLES_PER_REASON: usize = 5;

/// Estimated tokens per UTF-8 byte of serialized context.
const BYTES_PER_TOKEN: f64 = 3.8;

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ProjectionDebug {
    pub raw_counts: BTreeMap<String, usize>,
    pub injected_counts: BTreeMap<String, usize>,
    pub dropped_by_reason: BTreeMap<String, usize>,
    pub dropped_samples: BTreeMap<String, Vec<DroppedSample>>,
}

impl ProjectionDebug {
    fn record_drop(&mut self, reason: DropReason, sample: DroppedSample) {
        *self
            .dropped_by_reason
            .entry(reason.as_str().to_string())
            .or_insert(0) += 1;
        let samples = self
            .dropped_samples
            .entry(reason.as_str().to_string())
            .or_default();
        if samples.len() < MAX_DROPPED_SAMPLES_PER_REASON {
            samples.push(sample);
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProjectionOptions {
    pub max_items_by_tier: Option<BTreeMap<Tier, usize>>,
    pub token_budget: Option<usize>,
    pub drop_terminal_working: bool,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            max_items_by_tier: None,
            token_budget: None,
            drop_terminal_working: true,
        }
    }
}

fn tier_counts(context: &AgentContext) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for tier in context.memory.present_tiers() {
        counts.insert(tier.as_str().to_string(), context.memory.get(tier).len());
    }
    counts
}

fn project_with_options(raw: &AgentContext, options: &ProjectionOptions) -> (AgentContext, ProjectionDebug) {
    let mut debug = ProjectionDebug {
        raw_counts: tier_counts(raw),
        ..Default::default()
    };

    let mut injected = raw.clone();
    // Projection-only fields never reach the model side.
    injected.task_checkpoint = None;
    injected.last_task = None;

    let round = raw.runtime.round;
    for tier in raw.memory.present_tiers() {
        let max_override = options
            .max_items_by_tier
            .as_ref()
            .and_then(|m| m.get(&tier))
            .copied();
        let (kept, dropped) = compact_tier(
            raw.memory.get(tier),
            tier,
            round,
            TierCompactOptions {
                mode: CompactionMode::Projection,
                max_items_override: max_override,
                drop_terminal_working: options.drop_terminal_working,
            },
        );
        *injected.memory.get_mut(tier) = kept;
        for (reason, sample) in dropped {
            debug.record_drop(reason, sample);
        }
    }

    debug.injected_counts = tier_counts(&injected);
    (injected, debug)
}

/// Build the injected (model-facing) context from the raw context, with drop
/// accounting.
pub fn build_injected_projection(raw: &AgentContext) -> (AgentContext, ProjectionDebug) {
    project_with_options(raw, &ProjectionOptions::default())
}

#[derive(Clone, Debug)]
pub struct ContextSnapshotV2 {
    /// The raw context after raw-retention compaction; what the session
    /// stores back.
    pub raw: AgentContext,
    /// The projected context the system-context message is built from.
    pub injected: AgentContext,
    /// The whitelist projection used for on-wire serialization.
    pub model_context: ModelContextV2,
    pub debug: ProjectionDebug,
}

pub fn estimate_model_context_tokens(model_context: &ModelContextV2) -> usize {
    let encoded = serde_json::to_string(model_context).unwrap_or_default();
    (encoded.len() as f64 / BYTES_PER_TOKEN).ceil() as usize
}

/// Tiers trimmed first when the serialized context exceeds the token budget.
const TRIM_ORDER: [Tier; 4] = [Tier::Ephemeral, Tier::Working, Tier::Longterm, Tier::Core];

/// The full projection pipeline: raw compaction, injected projection, model
/// whitelist, and optional token-budget trimming.
pub fn project_context_snapshot_v2(raw: &AgentContext, options: &ProjectionOptions) -> ContextSnapshotV2 {
    let raw_compacted = compact_raw_for_storage(raw);
    let (mut injected, mut debug) = project_with_options(&raw_compacted, options);
    let mut model_context = to_model_context_v2(&injected);

    if let Some(budget) = options.token_budget {
        let present = model_context.memory.present_tiers();
        for tier in TRIM_ORDER.into_iter().filter(|t| present.contains(t)) {
            while estimate_model_context_tokens(&model_context) > budget {
                let Some(block) = model_context.memory.get_mut(tier).pop() else {
                    break;
                };
                injected.memory.get_mut(tier).pop();
                debug.record_drop(DropReason::TokenBudgetTrimmed, DroppedSample::of(tier, &block));
            }
        }
        let final_estimate = estimate_model_context_tokens(&model_context);
        if final_estimate > budget {
            tracing::debug!(
                estimate = final_estimate,
                budget,
                "context still over token budget after trimming all tiers"
            );
        }
        debug.injected_counts = tier_counts(&injected);
    }

    ContextSnapshotV2 {
        raw: raw_compacted,
        injected,
        model_context,
        debug,
    }
}
