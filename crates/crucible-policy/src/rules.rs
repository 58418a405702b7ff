//! User-configured permission rules, keyed by tool name.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Allow/deny regex lists for a single tool.
///
/// An empty allow list means allow-by-default; deny rules always win over
/// allow rules. Invalid regexes are treated as non-matching.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolRules {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolRules {
    pub fn allow_all() -> Self {
        Self {
            allow: vec![".*".to_string()],
            deny: Vec::new(),
        }
    }

    pub(crate) fn denies(&self, target: &str) -> bool {
        self.deny.iter().any(|p| matches(p, target))
    }

    pub(crate) fn allows(&self, target: &str) -> bool {
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|p| matches(p, target))
    }
}

fn matches(pattern: &str, target: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(target),
        Err(e) => {
            tracing::warn!("ignoring invalid permission pattern '{}': {}", pattern, e);
            false
        }
    }
}

/// The full per-tool rule set as configured by the user.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PermissionRules {
    #[serde(default)]
    pub permissions: HashMap<String, ToolRules>,
}

impl PermissionRules {
    pub fn tool(&self, name: &str) -> Option<&ToolRules> {
        self.permissions.get(name)
    }

    pub fn with_tool(mut self, name: impl Into<String>, rules: ToolRules) -> Self {
        self.permissions.insert(name.into(), rules);
        self
    }
}
