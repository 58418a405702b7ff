//! Target guards for tool execution.
//!
//! Decision order, highest priority first: hard-blocked workspace paths,
//! the builtin deny regex set (checked against the raw and percent-decoded
//! target), user deny rules, user allow rules.

use crate::rules::{PermissionRules, ToolRules};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// Basenames that are never exposed through any tool.
const SENSITIVE_BASENAMES: [&str; 2] = [".agent", "secrets"];
const SENSITIVE_CONFIG: &str = "agent.config.json";
const SENSITIVE_ENV_PREFIX: &str = ".env";

fn builtin_deny_set() -> &'static Vec<Regex> {
    static SET: OnceLock<Vec<Regex>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            // Path traversal, literal and URL-encoded (single and double).
            r"(?i)\.\.",
            r"(?i)%2e%2e",
            r"(?i)%252e%252e",
            // Null-byte injection.
            r"\x00",
            r"(?i)%00",
            // Windows UNC.
            r"^\\\\",
            // Shell metacharacters and expansions.
            r"[;&|`]",
            r"\$\(",
            r"\$\{",
            // Unix system directories.
            r"^(/etc|/var|/usr|/bin|/sbin|/dev|/proc|/sys|/boot|/lib|/root)(/|$)",
            // Windows system directories.
            r"(?i)^[a-z]:[\\/](windows|system32|program files|programdata)",
            // Non-http(s) URL schemes.
            r"(?i)^(file|ftp|ssh|telnet|gopher|sftp):",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("builtin deny pattern"))
        .collect()
    })
}

/// Single-pass percent decoding; malformed escapes pass through unchanged.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn builtin_denies(target: &str) -> bool {
    let set = builtin_deny_set();
    if set.iter().any(|re| re.is_match(target)) {
        return true;
    }
    let decoded = percent_decode(target);
    decoded != target && set.iter().any(|re| re.is_match(&decoded))
}

/// Lexical normalization: resolves `.` and `..` without touching the fs.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn workspace_relative(path: &str, workspace: &str) -> Option<PathBuf> {
    let norm = lexical_normalize(Path::new(path));
    let ws = lexical_normalize(Path::new(workspace));
    norm.strip_prefix(&ws).ok().map(Path::to_path_buf)
}

/// A sensitive workspace path: anything under `{workspace}/.agent`, the
/// `secrets/**` tree, `agent.config.json`, or any `.env*` basename inside
/// the workspace.
pub fn is_sensitive_workspace_path(path: &str, workspace: &str) -> bool {
    let Some(rel) = workspace_relative(path, workspace) else {
        return false;
    };
    let mut comps = rel.components();
    if let Some(Component::Normal(first)) = comps.next() {
        let first = first.to_string_lossy();
        if SENSITIVE_BASENAMES.contains(&first.as_ref()) {
            return true;
        }
        if first == SENSITIVE_CONFIG && rel.components().count() == 1 {
            return true;
        }
    }
    rel.components().any(|c| {
        matches!(c, Component::Normal(name)
            if name.to_string_lossy().starts_with(SENSITIVE_ENV_PREFIX))
    })
}

fn hard_blocked(target: &str, workspace: &str) -> bool {
    is_sensitive_workspace_path(target, workspace)
        || is_sensitive_workspace_path(&percent_decode(target), workspace)
}

fn check_target(tool: &str, target: &str, rules: &PermissionRules, workspace: &str) -> bool {
    if hard_blocked(target, workspace) {
        return false;
    }
    if builtin_denies(target) {
        return false;
    }
    let tool_rules = rules.tool(tool).cloned().unwrap_or_else(ToolRules::default);
    if tool_rules.denies(target) {
        return false;
    }
    tool_rules.allows(target)
}

pub fn can_read_file(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("read", path, rules, workspace)
}

pub fn can_write_file(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("write", path, rules, workspace)
}

pub fn can_list_dir(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("ls", path, rules, workspace)
}

pub fn can_read_tree(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("tree", path, rules, workspace)
}

pub fn can_ripgrep(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("ripgrep", path, rules, workspace)
}

pub fn can_copy_from(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("cp", path, rules, workspace)
}

pub fn can_copy_to(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("cp", path, rules, workspace)
}

pub fn can_move_from(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("mv", path, rules, workspace)
}

pub fn can_move_to(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("mv", path, rules, workspace)
}

pub fn can_use_git(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("git", path, rules, workspace)
}

pub fn can_use_bash(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("bash", path, rules, workspace)
}

pub fn can_use_background(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("background", path, rules, workspace)
}

pub fn can_use_todo(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("todo", path, rules, workspace)
}

pub fn can_use_memory(path: &str, rules: &PermissionRules, workspace: &str) -> bool {
    check_target("memory", path, rules, workspace)
}

pub fn can_visit_url(url: &str, rules: &PermissionRules, workspace: &str) -> bool {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return false;
    }
    check_target("webfetch", url, rules, workspace)
}

/// Directory entries hidden from `ls`/`tree` output.
pub fn should_hide_dir_entry(name: &str) -> bool {
    SENSITIVE_BASENAMES.contains(&name)
        || name == SENSITIVE_CONFIG
        || name.starts_with(SENSITIVE_ENV_PREFIX)
}

/// Exclusion globs handed to ripgrep, covering the search root and every
/// nesting depth below it.
pub fn ripgrep_exclude_globs(_search_dir: &str) -> Vec<String> {
    [
        ".agent/**",
        "secrets/**",
        "agent.config.json",
        ".env*",
    ]
    .iter()
    .flat_map(|g| [format!("!{g}"), format!("!**/{g}")])
    .collect()
}

/// Textual detection of sensitive-path references inside free-form command
/// text: absolute references and relative forms rooted at `cwd`, including
/// `..` traversal.
pub fn has_sensitive_path_reference(text: &str, workspace: &str, cwd: &str) -> bool {
    for token in tokenize_pathlike(text) {
        let resolved = if Path::new(&token).is_absolute() {
            token.clone()
        } else {
            Path::new(cwd).join(&token).to_string_lossy().into_owned()
        };
        if is_sensitive_workspace_path(&resolved, workspace) {
            return true;
        }
    }
    false
}

fn tokenize_pathlike(text: &str) -> Vec<String> {
    text.split(|c: char| {
        c.is_whitespace() || matches!(c, '"' | '\'' | ';' | '&' | '|' | '(' | ')' | '<' | '>' | '=')
    })
    .map(|t| t.trim_matches(|c: char| matches!(c, ',' | ':')))
    .filter(|t| !t.is_empty())
    .filter(|t| t.contains('/') || t.starts_with('.'))
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_decode_roundtrip() {
        assert_eq!(percent_decode("a%2eb"), "a.b");
        assert_eq!(percent_decode("no-escapes"), "no-escapes");
        assert_eq!(percent_decode("bad%zz"), "bad%zz");
    }

    #[test]
    fn lexical_normalize_pops_parents() {
        assert_eq!(
            lexical_normalize(Path::new("/w/sub/../secrets")),
            PathBuf::from("/w/secrets")
        );
    }
}
