//! Memory blocks and their normalization caps.

use serde::{Deserialize, Serialize};

pub const MAX_CONTENT_CHARS: usize = 512;
pub const MAX_TAGS: usize = 8;
pub const MAX_TAG_CHARS: usize = 32;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Open,
    Done,
    Failed,
    Cancelled,
    Completed,
}

impl BlockStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MemoryBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub decay: f64,
    pub confidence: f64,
    pub round: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BlockStatus>,
}

impl MemoryBlock {
    pub fn has_terminal_status(&self) -> bool {
        self.status.map(|s| s.is_terminal()).unwrap_or(false)
    }
}

/// Block quality: `0.5*(1-decay) + 0.5*confidence`. Drives dedup and ranking.
pub fn quality(block: &MemoryBlock) -> f64 {
    0.5 * (1.0 - block.decay) + 0.5 * block.confidence
}

/// True when `incoming` should replace `existing` under the dedup ordering:
/// strictly higher quality, then higher round, then the later entry wins.
pub fn prefer_incoming(existing: &MemoryBlock, incoming: &MemoryBlock) -> bool {
    let (qe, qi) = (quality(existing), quality(incoming));
    if qi != qe {
        return qi > qe;
    }
    if incoming.round != existing.round {
        return incoming.round > existing.round;
    }
    true
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
