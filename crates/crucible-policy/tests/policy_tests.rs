//! Tests for crucible-policy: guard predicates, builtin deny set, sensitive
//! path detection, and command safety.

use crucible_policy::*;

fn allow_all_for(tools: &[&str]) -> PermissionRules {
    let mut rules = PermissionRules::default();
    for tool in tools {
        rules = rules.with_tool(*tool, ToolRules::allow_all());
    }
    rules
}

// ===========================================================================
// Sensitive workspace paths
// ===========================================================================

#[test]
fn sensitive_paths_block_even_with_allow_all() {
    let rules = allow_all_for(&["read", "write", "ls", "tree", "ripgrep"]);
    let ws = "/w";

    assert!(!can_write_file("/w/.env", &rules, ws));
    assert!(!can_write_file("/w/.env.local", &rules, ws));
    assert!(!can_list_dir("/w/.agent", &rules, ws));
    assert!(!can_read_file("/w/.agent/todo.db", &rules, ws));
    assert!(!can_read_file("/w/secrets/key.pem", &rules, ws));
    assert!(!can_read_file("/w/agent.config.json", &rules, ws));
    assert!(!can_read_tree("/w/sub/.env.production", &rules, ws));
}

#[test]
fn explicit_allow_rule_admits_ordinary_file() {
    let rules = PermissionRules::default().with_tool(
        "read",
        ToolRules {
            allow: vec![r"^/w/public\.txt$".to_string()],
            deny: vec![],
        },
    );
    assert!(can_read_file("/w/public.txt", &rules, "/w"));
    assert!(!can_read_file("/w/other.txt", &rules, "/w"));
}

#[test]
fn traversal_into_sensitive_dir_is_blocked() {
    let rules = allow_all_for(&["read"]);
    // The `..` literal trips the builtin deny set before path resolution.
    assert!(!can_read_file("/w/sub/../secrets/key", &rules, "/w"));
    assert!(!can_read_file("/w/%2e%2e/x", &rules, "/w"));
    assert!(!can_read_file("/w/%252e%252e/x", &rules, "/w"));
}

// ===========================================================================
// Builtin deny set
// ===========================================================================

#[test]
fn builtin_denies_system_dirs_and_metachars() {
    let rules = allow_all_for(&["read", "write", "bash"]);
    let ws = "/tmp/ws";

    assert!(!can_read_file("/etc/passwd", &rules, ws));
    assert!(!can_write_file("/usr/bin/x", &rules, ws));
    assert!(!can_read_file("/tmp/ws/a;rm x", &rules, ws));
    assert!(!can_read_file("/tmp/ws/$(whoami)", &rules, ws));
    assert!(!can_read_file("/tmp/ws/${HOME}", &rules, ws));
    assert!(!can_read_file("\\\\srv\\share", &rules, ws));
    assert!(!can_read_file("/tmp/ws/a\x00b", &rules, ws));
    assert!(can_read_file("/tmp/ws/src/main.rs", &rules, ws));
}

#[test]
fn url_schemes_are_restricted() {
    let rules = allow_all_for(&["webfetch"]);
    let ws = "/tmp/ws";
    assert!(can_visit_url("https://example.com/docs", &rules, ws));
    assert!(can_visit_url("http://localhost:3000", &rules, ws));
    assert!(!can_visit_url("file:///etc/passwd", &rules, ws));
    assert!(!can_visit_url("ftp://host/x", &rules, ws));
    assert!(!can_visit_url("gopher://host", &rules, ws));
}

#[test]
fn user_deny_wins_over_allow() {
    let rules = PermissionRules::default().with_tool(
        "read",
        ToolRules {
            allow: vec![".*".to_string()],
            deny: vec![r"\.pem$".to_string()],
        },
    );
    assert!(!can_read_file("/tmp/ws/cert.pem", &rules, "/tmp/ws"));
    assert!(can_read_file("/tmp/ws/cert.txt", &rules, "/tmp/ws"));
}

#[test]
fn empty_allow_list_allows_by_default() {
    let rules = PermissionRules::default();
    assert!(can_read_file("/tmp/ws/readme.md", &rules, "/tmp/ws"));
}

// ===========================================================================
// Helpers
// ===========================================================================

#[test]
fn hide_dir_entries() {
    assert!(should_hide_dir_entry(".agent"));
    assert!(should_hide_dir_entry("secrets"));
    assert!(should_hide_dir_entry("agent.config.json"));
    assert!(should_hide_dir_entry(".env"));
    assert!(should_hide_dir_entry(".env.local"));
    assert!(!should_hide_dir_entry("src"));
    assert!(!should_hide_dir_entry(".gitignore"));
}

#[test]
fn ripgrep_excludes_cover_both_depths() {
    let globs = ripgrep_exclude_globs("/tmp/ws");
    assert!(globs.contains(&"!.agent/**".to_string()));
    assert!(globs.contains(&"!**/.agent/**".to_string()));
    assert!(globs.contains(&"!secrets/**".to_string()));
    assert!(globs.contains(&"!**/secrets/**".to_string()));
    assert!(globs.contains(&"!agent.config.json".to_string()));
    assert!(globs.contains(&"!.env*".to_string()));
    assert!(globs.contains(&"!**/.env*".to_string()));
}

#[test]
fn sensitive_reference_detection() {
    let ws = "/w";
    assert!(has_sensitive_path_reference("cat /w/secrets/key.pem", ws, "/w"));
    assert!(has_sensitive_path_reference("cat secrets/key.pem", ws, "/w"));
    assert!(has_sensitive_path_reference("cat ../secrets/x", ws, "/w/sub"));
    assert!(has_sensitive_path_reference("source .env", ws, "/w"));
    assert!(has_sensitive_path_reference("cp /w/agent.config.json /tmp/", ws, "/w"));
    assert!(!has_sensitive_path_reference("cargo build --release", ws, "/w"));
    assert!(!has_sensitive_path_reference("cat src/main.rs", ws, "/w"));
}

// ===========================================================================
// Command safety
// ===========================================================================

#[test]
fn command_safety_verdict_shape() {
    let ok = validate_bash_command_safety("ls -la");
    assert!(ok.ok);
    assert!(ok.rule_id.is_none());

    let blocked = validate_bash_command_safety("git pull && sudo reboot");
    assert!(!blocked.ok);
    assert_eq!(blocked.rule_id.as_deref(), Some("host_shutdown"));
    assert!(blocked.message.is_some());
}
