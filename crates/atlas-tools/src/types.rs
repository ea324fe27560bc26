// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single tool invocation requested by the model (§3 Tool Call Request).
///
/// `name` is the fully-qualified tool name `server_name + "_" + tool_name`;
/// [`crate::mcp::split_fully_qualified_name`] recovers the two parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// An artifact produced as a side-effect of a tool call (e.g. a generated
/// file reference). Opaque to the orchestrator; forwarded verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub uri: String,
}

/// The result of executing a tool call (§3 Tool Result).
///
/// Every [`ToolCallRequest`] produces exactly one `ToolResult`, success or
/// failure — the executor never omits one (§4.4 point 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub success: bool,
    pub error_reason: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            success: true,
            error_reason: None,
            artifacts: Vec::new(),
        }
    }

    pub fn failure(tool_call_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            tool_call_id: tool_call_id.into(),
            content: reason.clone(),
            success: false,
            error_reason: Some(reason),
            artifacts: Vec::new(),
        }
    }

    pub fn timed_out(tool_call_id: impl Into<String>) -> Self {
        Self::failure(tool_call_id, "tool timed out")
    }
}
