// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool Call Request/Result data model, MCP collaborator interface, and
//! approval policy — the collaborator-facing half of the Tool Executor
//! (C6). The executor itself (approval tickets, timeouts, concurrent
//! dispatch) lives in `atlas_core::tool_executor`, which depends on this
//! crate.
pub mod mcp;
pub mod mock;
pub mod policy;
pub mod schema;
pub mod types;

pub use mcp::{split_fully_qualified_name, McpClient, McpError, PromptDescriptor, ToolDescriptor};
pub use mock::{MockMcpClient, ScriptedTool};
pub use policy::{ApprovalPolicy, ToolPolicy};
pub use schema::{build_fleet_directory, build_prompt_directory, declares_mcp_data, inject_mcp_data};
pub use types::{Artifact, ToolCallRequest, ToolResult};
