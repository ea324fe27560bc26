// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Agentic Loop (C9): multi-step reasoning under LLM-chosen
//! `tool_choice=auto`. Generalizes the teacher's two-phase tool dispatch
//! (push all assistant tool-call messages, then execute concurrently
//! preserving index order) with the same cancellation-token discipline,
//! dropping the teacher's synthetic mode-switch/todo control tools — this
//! loop's LLM signals completion by simply returning no tool calls.
use std::sync::Arc;

use atlas_model::{LlmClient, ToolChoice};
use atlas_tools::McpClient;
use serde_json::Value;
use tracing::warn;

use crate::cancel::CancelToken;
use crate::events::{Event, Publisher};
use crate::message::{to_model_messages, ConversationHistory, Message};
use crate::mode_runners::drain_response_stream;
use crate::streaming::stream_and_accumulate;
use crate::tool_executor::{ExecutionContext, ToolExecutor};

/// The action kind carried by an [`AgentStep`] event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStepKind {
    ToolCalls,
    Final,
}

#[derive(Debug, Clone)]
pub struct AgentStep {
    pub step: u32,
    pub kind: AgentStepKind,
    pub payload: Value,
}

pub struct AgenticLoop {
    pub llm: Arc<dyn LlmClient>,
    pub mcp: Arc<dyn McpClient>,
    pub executor: ToolExecutor,
    pub selected_tools: Vec<String>,
    pub exec_ctx: ExecutionContext,
    pub max_steps: u32,
}

impl AgenticLoop {
    async fn build_tool_schema(&self) -> anyhow::Result<Vec<atlas_model::ToolSchema>> {
        let tools_by_server = self.mcp.list_tools().await?;
        let selected: std::collections::HashSet<&str> =
            self.selected_tools.iter().map(|s| s.as_str()).collect();
        Ok(tools_by_server
            .values()
            .flatten()
            .filter(|t| selected.contains(t.fully_qualified_name().as_str()))
            .map(|t| atlas_model::ToolSchema {
                name: t.fully_qualified_name(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect())
    }

    /// Drive the loop to completion. Mutates `history` along the way.
    /// Returns the final assistant text (possibly empty).
    pub async fn run(
        &self,
        history: &mut ConversationHistory,
        model: &str,
        temperature: f32,
        user_email: Option<&str>,
        publisher: &Publisher,
        cancel: &mut CancelToken,
    ) -> anyhow::Result<String> {
        let tools_schema = self.build_tool_schema().await?;
        let mut last_text = String::new();

        for step in 0..self.max_steps {
            if cancel.is_cancelled() {
                publisher.publish(Event::Error { message: "request cancelled".into() }).await;
                return Ok(last_text);
            }

            let model_messages = to_model_messages(history.as_slice());
            let mut cancel_rx = cancel.to_oneshot();
            let stream = self
                .llm
                .stream_with_tools(model, &model_messages, &tools_schema, ToolChoice::Auto, temperature, user_email, &mut cancel_rx)
                .await?;
            let round = drain_response_stream(stream).await?;

            if cancel.is_cancelled() {
                publisher.publish(Event::Error { message: "request cancelled".into() }).await;
                return Ok(last_text);
            }

            if round.tool_calls.is_empty() {
                let final_text = round.text_chunks.concat();
                publisher
                    .publish(Event::AgentStep {
                        step,
                        kind: "final".to_string(),
                        payload: serde_json::json!({ "text": final_text }),
                    })
                    .await;
                let stream = futures::stream::iter(round.text_chunks.into_iter().map(Ok));
                let emitted = stream_and_accumulate(Box::pin(stream), publisher).await;
                history.append(Message::assistant(emitted.clone()));
                return Ok(emitted);
            }

            publisher
                .publish(Event::AgentStep {
                    step,
                    kind: "tool_calls".to_string(),
                    payload: serde_json::to_value(&round.tool_calls).unwrap_or(Value::Null),
                })
                .await;

            let thought = round.text_chunks.concat();
            last_text = thought.clone();

            let results = self.executor.execute_many(&round.tool_calls, &self.exec_ctx, publisher, &*cancel).await;
            for result in results {
                history.append(Message::tool_result(result.tool_call_id.clone(), result.content.clone()));
            }
            if !thought.is_empty() {
                history.append(Message::assistant(thought));
            }
        }

        warn!(max_steps = self.max_steps, "agentic loop exceeded its step bound");
        publisher.publish(Event::Error { message: "agentic loop exceeded max_steps".into() }).await;
        Ok(last_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalBroker;
    use crate::cancel::CancelSource;
    use atlas_model::MockLlmClient;
    use atlas_tools::{MockMcpClient, ScriptedTool, ToolDescriptor, ToolPolicy};
    use std::time::Duration;

    fn tool(server: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor {
            server_name: server.into(),
            tool_name: name.into(),
            description: String::new(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn two_step_loop_calls_tool_then_answers() {
        let llm = Arc::new(MockLlmClient::tool_then_text("t1", "search_query", r#"{"q":"docs"}"#, "Found it"));
        let mcp = Arc::new(
            MockMcpClient::new()
                .with_tool(tool("search", "query"))
                .script("search_query", ScriptedTool::Value(serde_json::json!("docs..."))),
        );
        let executor = ToolExecutor::new(mcp.clone(), ToolPolicy::allow_all(), ApprovalBroker::new(), Duration::from_secs(1));
        let agentic = AgenticLoop {
            llm,
            mcp,
            executor,
            selected_tools: vec!["search_query".into()],
            exec_ctx: ExecutionContext { approval_suppressed: true, agent_mode: true, ..ExecutionContext::default() },
            max_steps: 10,
        };
        let mut history = ConversationHistory::new();
        history.append(Message::user("search the docs"));
        let (publisher, mut rx) = Publisher::new(32);
        let (_source, mut cancel) = CancelSource::new();
        let text = agentic.run(&mut history, "m", 0.0, None, &publisher, &mut cancel).await.unwrap();
        assert_eq!(text, "Found it");
        drop(publisher);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert!(events.iter().any(|e| matches!(e, Event::AgentStep { kind, .. } if kind == "tool_calls")));
        assert!(events.iter().any(|e| matches!(e, Event::AgentStep { kind, .. } if kind == "final")));
        assert!(matches!(events.last(), Some(Event::ChatResponse { .. }) | Some(Event::TokenStream { is_last: true, .. })));
    }

    #[tokio::test]
    async fn exceeding_max_steps_emits_error_and_returns_last_text() {
        let llm = Arc::new(MockLlmClient::scripted(vec![
            atlas_model::ScriptedReply::ToolCall { id: "a".into(), name: "search_query".into(), arguments: "{}".into() },
            atlas_model::ScriptedReply::ToolCall { id: "b".into(), name: "search_query".into(), arguments: "{}".into() },
        ]));
        let mcp = Arc::new(
            MockMcpClient::new()
                .with_tool(tool("search", "query"))
                .script("search_query", ScriptedTool::Value(serde_json::json!("x"))),
        );
        let executor = ToolExecutor::new(mcp.clone(), ToolPolicy::allow_all(), ApprovalBroker::new(), Duration::from_secs(1));
        let agentic = AgenticLoop {
            llm,
            mcp,
            executor,
            selected_tools: vec!["search_query".into()],
            exec_ctx: ExecutionContext { approval_suppressed: true, ..ExecutionContext::default() },
            max_steps: 2,
        };
        let mut history = ConversationHistory::new();
        history.append(Message::user("go"));
        let (publisher, mut rx) = Publisher::new(32);
        let (_source, mut cancel) = CancelSource::new();
        let _ = agentic.run(&mut history, "m", 0.0, None, &publisher, &mut cancel).await.unwrap();
        let mut saw_error = false;
        while let Some(e) = rx.recv().await {
            if matches!(e, Event::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
