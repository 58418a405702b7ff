//! Builtin command safety for free-form shell commands.
//!
//! Blocks the commands no agent task legitimately needs: recursive removal
//! of the filesystem root, host shutdown, and filesystem creation on block
//! devices, in plain, compound, and sudo forms.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SafetyVerdict {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SafetyVerdict {
    fn ok() -> Self {
        Self {
            ok: true,
            rule_id: None,
            message: None,
        }
    }

    fn blocked(rule_id: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            rule_id: Some(rule_id.to_string()),
            message: Some(message.into()),
        }
    }
}

struct BlockRule {
    id: &'static str,
    pattern: Regex,
    message: &'static str,
}

fn block_rules() -> &'static Vec<BlockRule> {
    static RULES: OnceLock<Vec<BlockRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            BlockRule {
                id: "rm_rf_root",
                pattern: Regex::new(
                    r"(?i)^\s*(sudo\s+)?rm\s+((-[a-z]*[rf][a-z]*|--recursive|--force|--no-preserve-root)\s+)+/+(\*)?\s*$",
                )
                .expect("rm_rf_root pattern"),
                message: "recursive removal of the filesystem root is blocked",
            },
            BlockRule {
                id: "host_shutdown",
                pattern: Regex::new(r"(?i)^\s*(sudo\s+)?(shutdown|reboot|halt|poweroff)\b")
                    .expect("host_shutdown pattern"),
                message: "host shutdown and reboot commands are blocked",
            },
            BlockRule {
                id: "mkfs_block_device",
                pattern: Regex::new(r"(?i)^\s*(sudo\s+)?mkfs(\.[a-z0-9]+)?\s+(\S+\s+)*/dev/")
                    .expect("mkfs_block_device pattern"),
                message: "creating filesystems on block devices is blocked",
            },
        ]
    })
}

/// Splits a compound command on `&&`, `||`, `;` and `|` so a dangerous
/// subcommand hidden behind an innocuous prefix is still seen.
fn split_compound(command: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let bytes = command.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b';' => {
                segments.push(&command[start..i]);
                start = i + 1;
                i += 1;
            }
            b'&' | b'|' => {
                segments.push(&command[start..i]);
                // Consume the doubled operator form as one separator.
                if i + 1 < bytes.len() && bytes[i + 1] == bytes[i] {
                    i += 2;
                } else {
                    i += 1;
                }
                start = i;
            }
            _ => i += 1,
        }
    }
    segments.push(&command[start..]);
    segments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Returns `{ok:true}` or `{ok:false, rule_id, message}`; every segment of a
/// compound command is checked independently.
pub fn validate_bash_command_safety(command: &str) -> SafetyVerdict {
    for segment in split_compound(command) {
        for rule in block_rules() {
            if rule.pattern.is_match(segment) {
                return SafetyVerdict::blocked(rule.id, rule.message);
            }
        }
    }
    SafetyVerdict::ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_ordinary_commands() {
        assert!(validate_bash_command_safety("ls -la && cargo test").ok);
        assert!(validate_bash_command_safety("rm -rf target/").ok);
        assert!(validate_bash_command_safety("echo reboot").ok);
    }

    #[test]
    fn blocks_rm_rf_root_aliases() {
        for cmd in ["rm -rf /", "rm -fr /", "rm -r -f /", "sudo rm -rf /", "rm -rf /*"] {
            let verdict = validate_bash_command_safety(cmd);
            assert!(!verdict.ok, "expected block for {cmd:?}");
            assert_eq!(verdict.rule_id.as_deref(), Some("rm_rf_root"));
        }
    }

    #[test]
    fn blocks_dangerous_tail_of_compound() {
        for cmd in [
            "true && rm -rf /",
            "false || sudo shutdown -h now",
            "echo hi; reboot",
            "cat x | shutdown now",
        ] {
            assert!(!validate_bash_command_safety(cmd).ok, "expected block for {cmd:?}");
        }
    }

    #[test]
    fn blocks_mkfs_on_block_device() {
        let verdict = validate_bash_command_safety("mkfs.ext4 -F /dev/sda1");
        assert!(!verdict.ok);
        assert_eq!(verdict.rule_id.as_deref(), Some("mkfs_block_device"));
    }
}
