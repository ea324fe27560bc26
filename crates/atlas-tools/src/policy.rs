// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;
use atlas_config::ToolsConfig;

/// Per-tool approval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Always run without asking
    Auto,
    /// Ask user before each invocation
    Ask,
    /// Never run; return an error
    Deny,
}

/// Policy engine that maps a tool call to an approval decision.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    auto_patterns: Vec<Regex>,
    deny_patterns: Vec<Regex>,
    force_ask: bool,
}

impl ToolPolicy {
    pub fn from_config(cfg: &ToolsConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> {
            patterns.iter().filter_map(|p| glob_to_regex(p)).collect()
        };
        Self {
            auto_patterns: compile(&cfg.auto_approve_patterns),
            deny_patterns: compile(&cfg.deny_patterns),
            force_ask: false,
        }
    }

    /// A policy that auto-approves every tool call. Used by callers that
    /// perform their own approval gating upstream (and by tests).
    pub fn allow_all() -> Self {
        Self { auto_patterns: vec![Regex::new(".*").unwrap()], deny_patterns: Vec::new(), force_ask: false }
    }

    /// A policy that asks for every tool call regardless of configured
    /// patterns. Used by tests exercising the approval path.
    pub fn ask_all() -> Self {
        Self { auto_patterns: Vec::new(), deny_patterns: Vec::new(), force_ask: true }
    }

    /// Decide whether a tool call (identified by its fully-qualified name
    /// `server_tool`) should run automatically, prompt the user, or be
    /// denied. Deny patterns take priority over auto-approve patterns.
    pub fn decide(&self, fully_qualified_name: &str) -> ApprovalPolicy {
        for re in &self.deny_patterns {
            if re.is_match(fully_qualified_name) {
                return ApprovalPolicy::Deny;
            }
        }
        if self.force_ask {
            return ApprovalPolicy::Ask;
        }
        for re in &self.auto_patterns {
            if re.is_match(fully_qualified_name) {
                return ApprovalPolicy::Auto;
            }
        }
        ApprovalPolicy::Ask
    }
}

/// Convert a simple shell glob pattern to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_config::ToolsConfig;

    fn policy_with(auto: &[&str], deny: &[&str]) -> ToolPolicy {
        ToolPolicy::from_config(&ToolsConfig {
            auto_approve_patterns: auto.iter().map(|s| s.to_string()).collect(),
            deny_patterns: deny.iter().map(|s| s.to_string()).collect(),
            ..ToolsConfig::default()
        })
    }

    // ── Deny takes priority ───────────────────────────────────────────────────

    #[test]
    fn deny_beats_auto_for_same_pattern() {
        let p = policy_with(&["fs_delete_*"], &["fs_delete_*"]);
        assert_eq!(p.decide("fs_delete_file"), ApprovalPolicy::Deny);
    }

    #[test]
    fn deny_exact_match() {
        let p = policy_with(&[], &["fs_delete_file"]);
        assert_eq!(p.decide("fs_delete_file"), ApprovalPolicy::Deny);
    }

    #[test]
    fn deny_does_not_match_different_prefix() {
        let p = policy_with(&[], &["fs_delete_file"]);
        // Completely different tool → should Ask, not Deny
        assert_ne!(p.decide("calc_add"), ApprovalPolicy::Deny);
    }

    // ── Auto-approve ──────────────────────────────────────────────────────────

    #[test]
    fn auto_approve_wildcard_prefix() {
        let p = policy_with(&["fs_read_*"], &[]);
        assert_eq!(p.decide("fs_read_file"), ApprovalPolicy::Auto);
    }

    #[test]
    fn auto_approve_exact_tool_name() {
        let p = policy_with(&["calc_add"], &[]);
        assert_eq!(p.decide("calc_add"), ApprovalPolicy::Auto);
    }

    #[test]
    fn auto_approve_question_mark_matches_one_char() {
        let p = policy_with(&["calc_op?"], &[]);
        assert_eq!(p.decide("calc_opa"), ApprovalPolicy::Auto);
        // Two chars after prefix → no match
        assert_ne!(p.decide("calc_opab"), ApprovalPolicy::Auto);
    }

    // ── Ask fallback ──────────────────────────────────────────────────────────

    #[test]
    fn unknown_tool_results_in_ask() {
        let p = policy_with(&["fs_read_*"], &["fs_delete_file"]);
        assert_eq!(p.decide("fs_write_file"), ApprovalPolicy::Ask);
    }

    #[test]
    fn empty_patterns_always_ask() {
        let p = policy_with(&[], &[]);
        assert_eq!(p.decide("anything"), ApprovalPolicy::Ask);
    }

    // ── Default config ────────────────────────────────────────────────────────

    #[test]
    fn default_config_auto_approves_read_tools() {
        let p = ToolPolicy::from_config(&ToolsConfig::default());
        assert_eq!(p.decide("fs_read_file"), ApprovalPolicy::Auto);
    }

    #[test]
    fn default_config_auto_approves_list_tools() {
        let p = ToolPolicy::from_config(&ToolsConfig::default());
        assert_eq!(p.decide("fs_list_dir"), ApprovalPolicy::Auto);
    }

    #[test]
    fn default_config_asks_for_write_tool() {
        let p = ToolPolicy::from_config(&ToolsConfig::default());
        assert_eq!(p.decide("fs_write_file"), ApprovalPolicy::Ask);
    }
}
