// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Scriptable mock MCP collaborator for tests, grounded on
//! `sven-model::mock::MockProvider`'s scripted-reply pattern.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::mcp::{McpClient, McpError, PromptDescriptor, ToolDescriptor};

/// A scripted tool behavior used by [`MockMcpClient`].
pub enum ScriptedTool {
    /// Return this value immediately.
    Value(Value),
    /// Sleep for the given duration, then return this value. Used to test
    /// concurrent `execute_many` wall-clock behavior (scenario C).
    Delay(Duration, Value),
    /// Fail with this transport error message.
    Fail(String),
}

/// A mock MCP collaborator with one fixed server directory and per-tool
/// scripted behaviors, keyed by fully-qualified name.
pub struct MockMcpClient {
    tools: HashMap<String, Vec<ToolDescriptor>>,
    prompts: HashMap<String, Vec<PromptDescriptor>>,
    scripts: Mutex<HashMap<String, ScriptedTool>>,
    calls: Mutex<Vec<String>>,
}

impl MockMcpClient {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            prompts: HashMap::new(),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_tool(mut self, descriptor: ToolDescriptor) -> Self {
        self.tools
            .entry(descriptor.server_name.clone())
            .or_default()
            .push(descriptor);
        self
    }

    pub fn script(self, fqn: impl Into<String>, behavior: ScriptedTool) -> Self {
        self.scripts.lock().unwrap().insert(fqn.into(), behavior);
        self
    }

    /// Fully-qualified names of tools invoked so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockMcpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl McpClient for MockMcpClient {
    async fn list_tools(&self) -> Result<HashMap<String, Vec<ToolDescriptor>>, McpError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        _arguments: Value,
        _timeout: Duration,
        _cancel: &mut oneshot::Receiver<()>,
    ) -> Result<Value, McpError> {
        let fqn = format!("{server}_{tool}");
        self.calls.lock().unwrap().push(fqn.clone());
        let script = self.scripts.lock().unwrap().remove(&fqn);
        match script {
            Some(ScriptedTool::Value(v)) => Ok(v),
            Some(ScriptedTool::Delay(d, v)) => {
                tokio::time::sleep(d).await;
                Ok(v)
            }
            Some(ScriptedTool::Fail(msg)) => Err(McpError::Transport(msg)),
            None => Err(McpError::UnknownTool(fqn)),
        }
    }

    async fn list_prompts(&self) -> Result<HashMap<String, Vec<PromptDescriptor>>, McpError> {
        Ok(self.prompts.clone())
    }
}

impl Clone for ToolDescriptor {
    fn clone(&self) -> Self {
        Self {
            server_name: self.server_name.clone(),
            tool_name: self.tool_name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl Clone for PromptDescriptor {
    fn clone(&self) -> Self {
        Self {
            server_name: self.server_name.clone(),
            prompt_name: self.prompt_name.clone(),
            description: self.description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn tool(server: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor {
            server_name: server.into(),
            tool_name: name.into(),
            description: String::new(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn call_tool_returns_scripted_value() {
        let client = MockMcpClient::new().script("calc_add", ScriptedTool::Value(serde_json::json!("5")));
        let (_tx, mut rx) = oneshot::channel();
        let out = client
            .call_tool("calc", "add", serde_json::json!({}), Duration::from_secs(1), &mut rx)
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!("5"));
    }

    #[tokio::test]
    async fn call_tool_without_script_is_unknown_tool() {
        let client = MockMcpClient::new();
        let (_tx, mut rx) = oneshot::channel();
        let err = client
            .call_tool("calc", "add", serde_json::json!({}), Duration::from_secs(1), &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn delayed_calls_actually_sleep() {
        let client = MockMcpClient::new()
            .script("srv_slow", ScriptedTool::Delay(Duration::from_millis(30), serde_json::json!("done")));
        let (_tx, mut rx) = oneshot::channel();
        let start = Instant::now();
        let out = client
            .call_tool("srv", "slow", serde_json::json!({}), Duration::from_secs(1), &mut rx)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(out, serde_json::json!("done"));
    }

    #[tokio::test]
    async fn list_tools_returns_registered_directory() {
        let client = MockMcpClient::new().with_tool(tool("calc", "add"));
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.get("calc").unwrap().len(), 1);
    }
}
