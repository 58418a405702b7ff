//! Extraction of model-emitted context patches from assistant text.

use serde_json::Value;

pub trait ExtractContextMiddleware: Send + Sync {
    /// Context patch objects found in the text, in order of appearance.
    fn extract(&self, text: &str) -> Vec<Value>;
}

/// Default extractor: fenced ```context_patch blocks holding one JSON object
/// each. Malformed blocks are skipped.
#[derive(Clone, Copy, Debug, Default)]
pub struct FencedContextPatchExtractor;

const FENCE_OPEN: &str = "```context_patch";
const FENCE_CLOSE: &str = "```";

impl ExtractContextMiddleware for FencedContextPatchExtractor {
    fn extract(&self, text: &str) -> Vec<Value> {
        let mut patches = Vec::new();
        let mut rest = text;
        while let Some(open) = rest.find(FENCE_OPEN) {
            let body_start = open + FENCE_OPEN.len();
            let Some(close) = rest[body_start..].find(FENCE_CLOSE) else {
                break;
            };
            let body = rest[body_start..body_start + close].trim();
            if let Ok(value) = serde_json::from_str::<Value>(body) {
                if value.is_object() {
                    patches.push(value);
                }
            }
            rest = &rest[body_start + close + FENCE_CLOSE.len()..];
        }
        patches
    }
}
