//! Tier compaction: normalization, dedup, thresholds, TTL, capacity.

use crate::block::{prefer_incoming, quality, truncate_chars, BlockStatus, MemoryBlock, MAX_CONTENT_CHARS, MAX_TAGS, MAX_TAG_CHARS};
use crate::context::AgentContext;
use crate::policy::{Tier, RAW_WORKING_TERMINAL_MAX_AGE};
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DropReason {
    ThresholdDecay,
    ThresholdConfidence,
    ExpiredByRound,
    OverMaxItems,
    InvalidBlock,
    WorkingStatusTerminal,
    TokenBudgetTrimmed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThresholdDecay => "threshold_decay",
            Self::ThresholdConfidence => "threshold_confidence",
            Self::ExpiredByRound => "expired_by_round",
            Self::OverMaxItems => "over_max_items",
            Self::InvalidBlock => "invalid_block",
            Self::WorkingStatusTerminal => "working_status_terminal",
            Self::TokenBudgetTrimmed => "token_budget_trimmed",
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DroppedSample {
    pub tier: String,
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
}

impl DroppedSample {
    pub(crate) fn of(tier: Tier, block: &MemoryBlock) -> Self {
        Self {
            tier: tier.as_str().to_string(),
            id: block.id.clone(),
            block_type: block.block_type.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CompactionMode {
    Projection,
    Raw,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct TierCompactOptions {
    pub mode: CompactionMode,
    pub max_items_override: Option<usize>,
    pub drop_terminal_working: bool,
}

/// Re-run normalization on an already-typed block. Field caps may have been
/// bypassed when the block was built in code rather than through sanitize.
fn renormalize_block(block: &MemoryBlock, current_round: u64, tier: Tier) -> Option<MemoryBlock> {
    let id = block.id.trim();
    let block_type = block.block_type.trim();
    let content = block.content.trim();
    if id.is_empty() || block_type.is_empty() || content.is_empty() {
        return None;
    }

    let mut tags: Vec<String> = Vec::new();
    for tag in &block.tags {
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

    let mut status = block.status;
    if status.is_none() && tier == Tier::Working {
        status = Some(BlockStatus::Open);
    }

    Some(MemoryBlock {
        id: id.to_string(),
        block_type: block_type.to_string(),
        decay: block.decay.clamp(0.0, 1.0),
        confidence: block.confidence.clamp(0.0, 1.0),
        round: block.round.max(1).min(current_round.max(1)),
        tags,
        content: truncate_chars(content, MAX_CONTENT_CHARS),
        status,
    })
}

fn quality_order(a: &MemoryBlock, b: &MemoryBlock) -> Ordering {
    quality(b)
        .partial_cmp(&quality(a))
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.round.cmp(&a.round))
        .then_with(|| a.id.cmp(&b.id))
}

pub(crate) fn compact_tier(
    blocks: &[MemoryBlock],
    tier: Tier,
    current_round: u64,
    opts: TierCompactOptions,
) -> (Vec<MemoryBlock>, Vec<(DropReason, DroppedSample)>) {
    let mut dropped: Vec<(DropReason, DroppedSample)> = Vec::new();
    let policy = match opts.mode {
        CompactionMode::Projection => tier.projection_policy(),
        CompactionMode::Raw => tier.raw_policy(),
    };
    let max_items = opts.max_items_override.unwrap_or(policy.max_items);

    // Normalize, then dedupe by id keeping the preferred block.
    let mut deduped: Vec<MemoryBlock> = Vec::new();
    for block in blocks {
        let Some(block) = renormalize_block(block, current_round, tier) else {
            dropped.push((DropReason::InvalidBlock, DroppedSample::of(tier, block)));
            continue;
        };
        match deduped.iter().position(|b| b.id == block.id) {
            Some(idx) if prefer_incoming(&deduped[idx], &block) => deduped[idx] = block,
            Some(_) => {}
            None => deduped.push(block),
        }
    }

    let mut kept: Vec<MemoryBlock> = Vec::new();
    for block in deduped {
        let age = current_round.saturating_sub(block.round);

        if opts.mode == CompactionMode::Projection
            && opts.drop_terminal_working
            && tier == Tier::Working
            && block.has_terminal_status()
        {
            dropped.push((DropReason::WorkingStatusTerminal, DroppedSample::of(tier, &block)));
            continue;
        }
        if block.decay > policy.max_decay {
            dropped.push((DropReason::ThresholdDecay, DroppedSample::of(tier, &block)));
            continue;
        }
        if block.confidence < policy.min_confidence {
            dropped.push((DropReason::ThresholdConfidence, DroppedSample::of(tier, &block)));
            continue;
        }

        let expired = match opts.mode {
            CompactionMode::Projection => policy.max_age_rounds.is_some_and(|max| age > max),
            CompactionMode::Raw => {
                let terminal_working = tier == Tier::Working && block.has_terminal_status();
                (terminal_working && age > RAW_WORKING_TERMINAL_MAX_AGE)
                    || policy.max_age_rounds.is_some_and(|max| age > max)
            }
        };
        if expired {
            dropped.push((DropReason::ExpiredByRound, DroppedSample::of(tier, &block)));
            continue;
        }

        kept.push(block);
    }

    kept.sort_by(quality_order);
    while kept.len() > max_items {
        let block = kept.pop().expect("non-empty over capacity");
        dropped.push((DropReason::OverMaxItems, DroppedSample::of(tier, &block)));
    }

    (kept, dropped)
}

/// Compact the raw stored context under the looser retention caps. The
/// runtime and every non-memory field pass through untouched.
pub fn compact_raw_for_storage(context: &AgentContext) -> AgentContext {
    let mut next = context.clone();
    let round = context.runtime.round;
    for tier in context.memory.present_tiers() {
        let (kept, _) = compact_tier(
            context.memory.get(tier),
            tier,
            round,
            TierCompactOptions {
                mode: CompactionMode::Raw,
                max_items_override: None,
                drop_terminal_working: false,
            },
        );
        *next.memory.get_mut(tier) = kept;
    }
    next
}
