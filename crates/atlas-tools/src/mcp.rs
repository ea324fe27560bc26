// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The MCP collaborator interface (§6): the only way the orchestration layer
//! talks to tool-serving and prompt-serving MCP servers. Implementations own
//! transport and server-process lifecycle; callers only ever see the three
//! operations below plus a cancellation signal.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

/// One tool exposed by an MCP server, as returned by `list_tools`.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub server_name: String,
    pub tool_name: String,
    pub description: String,
    /// JSON-schema-like parameter schema. When this schema declares an
    /// object property named `_mcp_data`, [`crate::schema::walk_for_mcp_data`]
    /// signals the executor to inject the tool-fleet directory at call time.
    pub parameters: Value,
}

impl ToolDescriptor {
    /// The name the model sees: `server_name + "_" + tool_name`.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}_{}", self.server_name, self.tool_name)
    }
}

/// One prompt exposed by an MCP server, as returned by `list_prompts`.
#[derive(Debug, Clone)]
pub struct PromptDescriptor {
    pub server_name: String,
    pub prompt_name: String,
    pub description: String,
}

/// Errors an MCP collaborator call can surface. Never propagated past the
/// Tool Executor (§4.4 point 4) — captured into a failed [`crate::ToolResult`].
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("unknown server: {0}")]
    UnknownServer(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("mcp transport error: {0}")]
    Transport(String),
}

/// The MCP collaborator trait (§6).
#[async_trait]
pub trait McpClient: Send + Sync {
    /// Enumerate tools grouped by server name.
    async fn list_tools(&self) -> Result<HashMap<String, Vec<ToolDescriptor>>, McpError>;

    /// Invoke one tool. `timeout` bounds the call; `cancel` fires on request
    /// cancellation. Implementations should race both against the transport
    /// call and return `Err(McpError::Transport(..))` on either firing first
    /// so the executor can distinguish "timed out" only by the `timeout`
    /// elapsing (the executor itself applies `tokio::time::timeout` too —
    /// this trait-level parameter lets native MCP transports honor it
    /// server-side as well, e.g. to cancel a long-running tool process).
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        timeout: Duration,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<Value, McpError>;

    /// Enumerate prompts grouped by server name.
    async fn list_prompts(&self) -> Result<HashMap<String, Vec<PromptDescriptor>>, McpError>;
}

/// Split a fully-qualified tool name at the first underscore that matches a
/// known server name (§4.4 point 1). Returns `None` if no known server
/// prefixes `fqn`.
pub fn split_fully_qualified_name<'a>(fqn: &'a str, known_servers: &[String]) -> Option<(&'a str, &'a str)> {
    let mut candidates: Vec<&String> = known_servers.iter().filter(|s| fqn.starts_with(s.as_str())).collect();
    // Prefer the longest matching server name so a server `foo_bar` is not
    // shadowed by a shorter server `foo` also present in the fleet.
    candidates.sort_by_key(|s| std::cmp::Reverse(s.len()));
    let server = candidates.into_iter().next()?;
    let rest = fqn.strip_prefix(server.as_str())?;
    let tool = rest.strip_prefix('_')?;
    if tool.is_empty() {
        return None;
    }
    Some((server.as_str(), tool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_qualified_name_joins_server_and_tool() {
        let d = ToolDescriptor {
            server_name: "calc".into(),
            tool_name: "add".into(),
            description: String::new(),
            parameters: serde_json::json!({}),
        };
        assert_eq!(d.fully_qualified_name(), "calc_add");
    }

    #[test]
    fn split_finds_known_server_prefix() {
        let servers = vec!["calc".to_string(), "search".to_string()];
        let (server, tool) = split_fully_qualified_name("calc_add", &servers).unwrap();
        assert_eq!(server, "calc");
        assert_eq!(tool, "add");
    }

    #[test]
    fn split_prefers_longest_matching_server() {
        let servers = vec!["foo".to_string(), "foo_bar".to_string()];
        let (server, tool) = split_fully_qualified_name("foo_bar_baz", &servers).unwrap();
        assert_eq!(server, "foo_bar");
        assert_eq!(tool, "baz");
    }

    #[test]
    fn split_returns_none_for_unknown_server() {
        let servers = vec!["calc".to_string()];
        assert!(split_fully_qualified_name("unknown_add", &servers).is_none());
    }

    #[test]
    fn split_returns_none_when_tool_part_empty() {
        let servers = vec!["calc".to_string()];
        assert!(split_fully_qualified_name("calc_", &servers).is_none());
        assert!(split_fully_qualified_name("calc", &servers).is_none());
    }
}
