// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool Executor (C6, §4.4).
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use atlas_tools::{
    build_fleet_directory, declares_mcp_data, inject_mcp_data, split_fully_qualified_name,
    ApprovalPolicy, McpClient, ToolCallRequest, ToolDescriptor, ToolPolicy, ToolResult,
};

use crate::approval::{ApprovalBroker, ApprovalResponse, AwaitError};
use crate::cancel::CancelToken;
use crate::events::{Event, Publisher};

/// A human-in-the-loop gate on a tool call (§3 Approval Ticket).
#[derive(Debug, Clone)]
pub struct ApprovalTicket {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub edit_allowed: bool,
    pub admin_required: bool,
}

/// Per-call context the Tool Executor needs beyond the call itself:
/// whether approval is globally suppressed for this session, the servers
/// reserved as "system" (excluded from `_mcp_data` fleet directories), an
/// optional approval timeout, and whether this call originates from the
/// agentic loop (surfaced on `tool_start` for UI differentiation).
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub approval_suppressed: bool,
    pub system_servers: Vec<String>,
    pub approval_timeout: Option<Duration>,
    pub agent_mode: bool,
}

#[derive(Clone)]
pub struct ToolExecutor {
    mcp: Arc<dyn McpClient>,
    policy: ToolPolicy,
    broker: ApprovalBroker,
    call_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(mcp: Arc<dyn McpClient>, policy: ToolPolicy, broker: ApprovalBroker, call_timeout: Duration) -> Self {
        Self { mcp, policy, broker, call_timeout }
    }

    /// Execute one tool call (§4.4 algorithm, steps 1-4). Never raises: every
    /// input yields exactly one [`ToolResult`] (state machine: pending →
    /// optionally awaiting-approval → approved|rejected → running →
    /// succeeded|failed|timed-out).
    pub async fn execute_one(
        &self,
        call: &ToolCallRequest,
        ctx: &ExecutionContext,
        publisher: &Publisher,
        cancel: &mut CancelToken,
    ) -> ToolResult {
        let tools_by_server = match self.mcp.list_tools().await {
            Ok(t) => t,
            Err(e) => {
                let msg = e.to_string();
                publisher.publish(Event::ToolError { tool_call_id: call.id.clone(), error: msg.clone() }).await;
                return ToolResult::failure(&call.id, msg);
            }
        };
        let known_servers: Vec<String> = tools_by_server.keys().cloned().collect();

        let Some((server, tool_name)) = split_fully_qualified_name(&call.name, &known_servers) else {
            let msg = format!("unresolvable tool name: {}", call.name);
            publisher.publish(Event::ToolError { tool_call_id: call.id.clone(), error: msg.clone() }).await;
            return ToolResult::failure(&call.id, msg);
        };
        let (server, tool_name) = (server.to_string(), tool_name.to_string());

        let descriptor = tools_by_server
            .get(&server)
            .and_then(|ts| ts.iter().find(|t| t.tool_name == tool_name));

        let mut arguments = call.arguments.clone();
        if let Some(desc) = descriptor {
            if declares_mcp_data(&desc.parameters) {
                let directory = build_fleet_directory(&tools_by_server, &ctx.system_servers);
                inject_mcp_data(&mut arguments, directory);
            }
        }

        publisher
            .publish(Event::ToolStart {
                tool_call_id: call.id.clone(),
                tool_name: tool_name.clone(),
                server_name: server.clone(),
                arguments: arguments.clone(),
                agent_mode: ctx.agent_mode,
            })
            .await;

        // Step 2: approval gate.
        if !ctx.approval_suppressed && requires_approval(&self.policy, &call.name) {
            let ticket = ApprovalTicket {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: arguments.clone(),
                edit_allowed: true,
                admin_required: false,
            };
            publisher
                .publish(Event::ToolApprovalRequest {
                    tool_call_id: ticket.tool_call_id.clone(),
                    tool_name: ticket.tool_name.clone(),
                    arguments: ticket.arguments.clone(),
                    edit_allowed: ticket.edit_allowed,
                    admin_required: ticket.admin_required,
                })
                .await;

            match self.broker.await_response(&call.id, ctx.approval_timeout, cancel).await {
                Ok(ApprovalResponse::Approve { edited_arguments }) => {
                    if let Some(edited) = edited_arguments {
                        arguments = edited;
                    }
                }
                Ok(ApprovalResponse::Reject { reason }) => {
                    return self.complete_failure(call, publisher, reason).await;
                }
                Ok(ApprovalResponse::Cancel) | Err(AwaitError::Abandoned) => {
                    return self.complete_failure(call, publisher, "tool call cancelled").await;
                }
                Err(AwaitError::TimedOut) => {
                    return self.complete_failure(call, publisher, "approval timed out").await;
                }
            }
        }

        // Step 3: call the MCP server with a per-call timeout.
        info!(server = %server, tool_name = %tool_name, "dispatching tool call");
        let call_future = self.mcp.call_tool(&server, &tool_name, arguments, self.call_timeout, &mut cancel.to_oneshot());
        let result = match tokio::time::timeout(self.call_timeout, call_future).await {
            Ok(Ok(value)) => ToolResult::ok(&call.id, value_to_text(&value)),
            Ok(Err(e)) => ToolResult::failure(&call.id, e.to_string()),
            Err(_) => ToolResult::timed_out(&call.id),
        };

        publisher
            .publish(Event::ToolComplete {
                tool_call_id: call.id.clone(),
                success: result.success,
                result: result.content.clone(),
            })
            .await;
        result
    }

    async fn complete_failure(&self, call: &ToolCallRequest, publisher: &Publisher, reason: impl Into<String>) -> ToolResult {
        let result = ToolResult::failure(&call.id, reason);
        publisher
            .publish(Event::ToolComplete {
                tool_call_id: call.id.clone(),
                success: false,
                result: result.content.clone(),
            })
            .await;
        result
    }

    /// Execute many tool calls concurrently; result order matches input order
    /// (§4.4 point 5, §8 invariant 2). Wall-clock is bounded by the slowest
    /// call, not the sum (scenario C).
    pub async fn execute_many(
        &self,
        calls: &[ToolCallRequest],
        ctx: &ExecutionContext,
        publisher: &Publisher,
        cancel: &CancelToken,
    ) -> Vec<ToolResult> {
        let mut handles = Vec::with_capacity(calls.len());
        for call in calls.iter().cloned() {
            let executor = self.clone();
            let ctx = ctx.clone();
            let publisher = publisher.clone();
            let mut cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                executor.execute_one(&call, &ctx, &publisher, &mut cancel).await
            }));
        }
        let mut results = Vec::with_capacity(handles.len());
        for (call, handle) in calls.iter().zip(handles) {
            let result = match handle.await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "tool execution task panicked");
                    ToolResult::failure(&call.id, "tool execution task panicked")
                }
            };
            results.push(result);
        }
        results
    }
}

fn requires_approval(policy: &ToolPolicy, fully_qualified_name: &str) -> bool {
    matches!(policy.decide(fully_qualified_name), ApprovalPolicy::Ask)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Describe a directory of non-system tools for discovery/introspection
/// (used by the `_mcp_data` injection path and exposed for callers that
/// want to render a tool picker UI).
pub fn describe_fleet(tools_by_server: &HashMap<String, Vec<ToolDescriptor>>, system_servers: &[String]) -> Value {
    build_fleet_directory(tools_by_server, system_servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use atlas_tools::{MockMcpClient, ScriptedTool, ToolDescriptor};
    use std::time::Duration as StdDuration;

    fn tool(server: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor {
            server_name: server.into(),
            tool_name: name.into(),
            description: String::new(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    fn allow_all_ctx() -> ExecutionContext {
        ExecutionContext { approval_suppressed: true, ..ExecutionContext::default() }
    }

    #[tokio::test]
    async fn execute_one_succeeds_and_emits_start_and_complete() {
        let mcp = Arc::new(
            MockMcpClient::new()
                .with_tool(tool("calc", "add"))
                .script("calc_add", ScriptedTool::Value(serde_json::json!("5"))),
        );
        let executor = ToolExecutor::new(mcp, ToolPolicy::allow_all(), ApprovalBroker::new(), StdDuration::from_secs(1));
        let (publisher, mut rx) = Publisher::new(16);
        let call = ToolCallRequest { id: "t1".into(), name: "calc_add".into(), arguments: serde_json::json!({"a":2,"b":3}) };
        let (_source, mut cancel) = CancelSource::new();
        let result = executor.execute_one(&call, &allow_all_ctx(), &publisher, &mut cancel).await;
        assert!(result.success);
        assert_eq!(result.content, "5");

        let e1 = rx.recv().await.unwrap();
        assert!(matches!(e1, Event::ToolStart { .. }));
        let e2 = rx.recv().await.unwrap();
        assert!(matches!(e2, Event::ToolComplete { success: true, .. }));
    }

    #[tokio::test]
    async fn execute_one_unknown_server_fails_without_panicking() {
        let mcp = Arc::new(MockMcpClient::new());
        let executor = ToolExecutor::new(mcp, ToolPolicy::allow_all(), ApprovalBroker::new(), StdDuration::from_secs(1));
        let (publisher, _rx) = Publisher::new(16);
        let call = ToolCallRequest { id: "t1".into(), name: "unknown_tool".into(), arguments: serde_json::json!({}) };
        let (_source, mut cancel) = CancelSource::new();
        let result = executor.execute_one(&call, &allow_all_ctx(), &publisher, &mut cancel).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn execute_one_times_out() {
        let mcp = Arc::new(
            MockMcpClient::new()
                .with_tool(tool("srv", "slow"))
                .script("srv_slow", ScriptedTool::Delay(StdDuration::from_millis(100), serde_json::json!("done"))),
        );
        let executor = ToolExecutor::new(mcp, ToolPolicy::allow_all(), ApprovalBroker::new(), StdDuration::from_millis(10));
        let (publisher, _rx) = Publisher::new(16);
        let call = ToolCallRequest { id: "t1".into(), name: "srv_slow".into(), arguments: serde_json::json!({}) };
        let (_source, mut cancel) = CancelSource::new();
        let result = executor.execute_one(&call, &allow_all_ctx(), &publisher, &mut cancel).await;
        assert!(!result.success);
        assert_eq!(result.content, "tool timed out");
    }

    #[tokio::test]
    async fn execute_many_preserves_result_order() {
        let mcp = Arc::new(
            MockMcpClient::new()
                .with_tool(tool("srv", "x"))
                .with_tool(tool("srv", "y"))
                .script("srv_x", ScriptedTool::Delay(StdDuration::from_millis(40), serde_json::json!("rx")))
                .script("srv_y", ScriptedTool::Value(serde_json::json!("ry"))),
        );
        let executor = ToolExecutor::new(mcp, ToolPolicy::allow_all(), ApprovalBroker::new(), StdDuration::from_secs(1));
        let (publisher, _rx) = Publisher::new(64);
        let calls = vec![
            ToolCallRequest { id: "a".into(), name: "srv_x".into(), arguments: serde_json::json!({}) },
            ToolCallRequest { id: "b".into(), name: "srv_y".into(), arguments: serde_json::json!({}) },
        ];
        let (_source, cancel) = CancelSource::new();
        let results = executor.execute_many(&calls, &allow_all_ctx(), &publisher, &cancel).await;
        assert_eq!(results[0].tool_call_id, "a");
        assert_eq!(results[1].tool_call_id, "b");
    }

    #[tokio::test]
    async fn execute_many_runs_concurrently_not_sequentially() {
        let mcp = Arc::new(
            MockMcpClient::new()
                .with_tool(tool("srv", "x"))
                .with_tool(tool("srv", "y"))
                .script("srv_x", ScriptedTool::Delay(StdDuration::from_millis(50), serde_json::json!("rx")))
                .script("srv_y", ScriptedTool::Delay(StdDuration::from_millis(50), serde_json::json!("ry"))),
        );
        let executor = ToolExecutor::new(mcp, ToolPolicy::allow_all(), ApprovalBroker::new(), StdDuration::from_secs(1));
        let (publisher, _rx) = Publisher::new(64);
        let calls = vec![
            ToolCallRequest { id: "a".into(), name: "srv_x".into(), arguments: serde_json::json!({}) },
            ToolCallRequest { id: "b".into(), name: "srv_y".into(), arguments: serde_json::json!({}) },
        ];
        let (_source, cancel) = CancelSource::new();
        let start = std::time::Instant::now();
        let results = executor.execute_many(&calls, &allow_all_ctx(), &publisher, &cancel).await;
        let elapsed = start.elapsed();
        assert!(elapsed < StdDuration::from_millis(90), "expected concurrent execution, took {elapsed:?}");
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn rejected_approval_produces_failure_result() {
        let mcp = Arc::new(
            MockMcpClient::new()
                .with_tool(tool("fs", "write"))
                .script("fs_write", ScriptedTool::Value(serde_json::json!("written"))),
        );
        let policy = ToolPolicy::ask_all();
        let broker = ApprovalBroker::new();
        let executor = ToolExecutor::new(mcp, policy, broker.clone(), StdDuration::from_secs(1));
        let (publisher, _rx) = Publisher::new(16);
        let call = ToolCallRequest { id: "t1".into(), name: "fs_write".into(), arguments: serde_json::json!({}) };
        let (_source, mut cancel) = CancelSource::new();

        let broker2 = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            broker2.resolve("t1", ApprovalResponse::Reject { reason: "no".into() }).await;
        });

        let ctx = ExecutionContext::default();
        let result = executor.execute_one(&call, &ctx, &publisher, &mut cancel).await;
        assert!(!result.success);
        assert_eq!(result.error_reason.as_deref(), Some("no"));
    }
}
