//! Crucible Policy - allow/deny predicates guarding every tool target
//!
//! Pure functions only: a predicate returns a single bool and never throws.
//! Denials surface as `error` fields in the calling tool's reply.

pub mod command_safety;
pub mod guard;
pub mod rules;

pub use command_safety::{validate_bash_command_safety, SafetyVerdict};
pub use guard::*;
pub use rules::{PermissionRules, ToolRules};
