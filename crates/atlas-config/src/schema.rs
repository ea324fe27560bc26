// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Top-level configuration for the orchestration core.
///
/// Loaded by [`crate::loader::load`] from a layered set of YAML files; every
/// field has a serde default so a config file may specify only the subset it
/// wants to override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub save: SaveConfig,
    #[serde(default)]
    pub content_policy: ContentPolicyConfig,
    /// Named provider configurations, keyed by an arbitrary identifier the
    /// caller selects with the request's `model` field.
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ModelConfig>,
}

/// LLM provider selection and call parameters.
///
/// The vendor SDK itself is out of scope for this workspace — this struct
/// only carries what the `LlmClient` collaborator needs to route and
/// authenticate a call; no driver implementation reads `api_key` directly,
/// since the transport shell resolves credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier, e.g. "openai" | "anthropic" | "mock".
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer `api_key_env` in config files.
    pub api_key: Option<String>,
    /// Base URL override, e.g. a local proxy or self-hosted endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0-2.0).
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            name: "mock-model".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
        }
    }
}

fn default_max_steps() -> u32 {
    10
}

/// Agentic Loop (C9) bounds and prompt overrides.
///
/// `agent_loop_strategy` is currently fixed to `"agentic"` — this workspace
/// implements only the agentic strategy named in the external interfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Bound on the number of reasoning steps before the loop gives up and
    /// emits an error (§4.3).
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// System prompt override; `None` uses the built-in prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { max_steps: default_max_steps(), system_prompt: None }
    }
}

/// Approval policy (§4.4 step 2) and MCP call shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Fully-qualified tool name globs that run without an approval prompt.
    pub auto_approve_patterns: Vec<String>,
    /// Fully-qualified tool name globs that are refused outright.
    pub deny_patterns: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: vec!["*_read_*".into(), "*_list_*".into(), "*_search_*".into()],
            deny_patterns: vec![],
        }
    }
}

/// Feature gates recognised by the orchestrator (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_true")]
    pub retrieval_enabled: bool,
    #[serde(default = "default_true")]
    pub tools_enabled: bool,
    #[serde(default = "default_true")]
    pub chat_history_enabled: bool,
    #[serde(default = "default_true")]
    pub file_content_extraction_enabled: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            retrieval_enabled: true,
            tools_enabled: true,
            chat_history_enabled: true,
            file_content_extraction_enabled: true,
        }
    }
}

fn default_mcp_call_timeout() -> u64 {
    120
}
fn default_mcp_discovery_timeout() -> u64 {
    30
}
fn default_retrieval_timeout() -> u64 {
    30
}

/// Collaborator timeouts, all in seconds (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_mcp_call_timeout")]
    pub mcp_call_timeout_secs: u64,
    #[serde(default = "default_mcp_discovery_timeout")]
    pub mcp_discovery_timeout_secs: u64,
    #[serde(default = "default_retrieval_timeout")]
    pub retrieval_timeout_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            mcp_call_timeout_secs: default_mcp_call_timeout(),
            mcp_discovery_timeout_secs: default_mcp_discovery_timeout(),
            retrieval_timeout_secs: default_retrieval_timeout(),
        }
    }
}

/// Per-session history persistence mode (§4.9, Glossary "Save-mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Never persisted; `conversation_saved` is never emitted.
    None,
    /// Persisted client-side; backend emits `conversation_saved` with an
    /// empty id.
    #[default]
    Local,
    /// Persisted server-side via the Persistence collaborator.
    Server,
}

impl std::fmt::Display for SaveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveMode::None => write!(f, "none"),
            SaveMode::Local => write!(f, "local"),
            SaveMode::Server => write!(f, "server"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SaveConfig {
    /// Default save-mode applied when a request does not specify one.
    #[serde(default)]
    pub default_mode: SaveMode,
}

/// Content-policy (Security Gate, C3) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPolicyConfig {
    #[serde(default = "default_true")]
    pub input_check_enabled: bool,
    #[serde(default = "default_true")]
    pub output_check_enabled: bool,
    /// Keywords that cause a `block` verdict; case-insensitive substring match.
    #[serde(default)]
    pub blocked_keywords: Vec<String>,
    /// Keywords that cause a `warn` verdict (logged, request continues).
    #[serde(default)]
    pub warn_keywords: Vec<String>,
}

impl Default for ContentPolicyConfig {
    fn default() -> Self {
        Self {
            input_check_enabled: true,
            output_check_enabled: true,
            blocked_keywords: vec![],
            warn_keywords: vec![],
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_model_provider_is_mock() {
        let c = Config::default();
        assert_eq!(c.model.provider, "mock");
    }

    #[test]
    fn config_default_max_steps_matches_spec_default() {
        let c = Config::default();
        assert_eq!(c.agent.max_steps, 10);
    }

    #[test]
    fn config_default_save_mode_is_local() {
        let c = Config::default();
        assert_eq!(c.save.default_mode, SaveMode::Local);
    }

    #[test]
    fn save_mode_display() {
        assert_eq!(SaveMode::None.to_string(), "none");
        assert_eq!(SaveMode::Local.to_string(), "local");
        assert_eq!(SaveMode::Server.to_string(), "server");
    }

    #[test]
    fn config_default_features_all_enabled() {
        let c = Config::default();
        assert!(c.features.retrieval_enabled);
        assert!(c.features.tools_enabled);
        assert!(c.features.chat_history_enabled);
        assert!(c.features.file_content_extraction_enabled);
    }

    #[test]
    fn config_default_timeouts_match_spec() {
        let c = Config::default();
        assert_eq!(c.timeouts.mcp_call_timeout_secs, 120);
        assert_eq!(c.timeouts.mcp_discovery_timeout_secs, 30);
        assert_eq!(c.timeouts.retrieval_timeout_secs, 30);
    }

    #[test]
    fn config_default_content_policy_checks_enabled_with_no_keywords() {
        let c = Config::default();
        assert!(c.content_policy.input_check_enabled);
        assert!(c.content_policy.output_check_enabled);
        assert!(c.content_policy.blocked_keywords.is_empty());
    }

    #[test]
    fn config_deserialises_from_partial_yaml() {
        let yaml = "model:\n  provider: anthropic\n  name: claude-opus-4-5\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.model.provider, "anthropic");
        assert_eq!(c.agent.max_steps, 10, "serde default must fill in missing field");
    }

    #[test]
    fn config_yaml_round_trip() {
        let mut c = Config::default();
        c.content_policy.blocked_keywords = vec!["secret".into()];
        c.save.default_mode = SaveMode::Server;
        let yaml = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.content_policy.blocked_keywords, vec!["secret".to_string()]);
        assert_eq!(back.save.default_mode, SaveMode::Server);
    }

    #[test]
    fn config_providers_map_round_trips() {
        let yaml = "providers:\n  local:\n    provider: openai\n    name: llama3.2\n    base_url: http://localhost:11434/v1\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        let p = c.providers.get("local").unwrap();
        assert_eq!(p.name, "llama3.2");
        assert_eq!(p.base_url.as_deref(), Some("http://localhost:11434/v1"));
    }

    #[test]
    fn tools_config_default_has_auto_approve_read_patterns() {
        let c = ToolsConfig::default();
        assert!(c.auto_approve_patterns.iter().any(|p| p.contains("read")));
    }
}
