// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Mode Runners (C8): one-shot execution strategies selected by request
//! shape. All three stream their *final* answer through the Streaming
//! Accumulator; intermediate tool-calling rounds are not published.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::warn;

use atlas_model::{LlmClient, ResponseEvent, ToolChoice};
use atlas_tools::{McpClient, ToolCallRequest};

use crate::cancel::CancelToken;
use crate::events::Publisher;
use crate::message::{to_model_messages, ConversationHistory, Message};
use crate::retrieval::{self, RetrievalProvider};
use crate::streaming::{emit_as_single_token, stream_and_accumulate};
use crate::tool_executor::{ExecutionContext, ToolExecutor};

/// A bounded tool-round loop exceeding this many rounds returns the last
/// assistant text rather than looping forever.
pub const MAX_TOOL_ROUNDS: u32 = 8;

#[async_trait]
pub trait ModeRunner: Send + Sync {
    /// Run this mode to completion, mutating `history` along the way and
    /// streaming the final answer through `publisher`. Returns the final
    /// assistant text (possibly empty — an empty final answer is not an
    /// error).
    async fn run_streaming(
        &self,
        history: &mut ConversationHistory,
        model: &str,
        temperature: f32,
        user_email: Option<&str>,
        publisher: &Publisher,
        cancel: &mut CancelToken,
    ) -> anyhow::Result<String>;
}

/// Accumulated result of draining one `stream_with_tools` round.
pub(crate) struct RoundResult {
    pub(crate) text_chunks: Vec<String>,
    pub(crate) tool_calls: Vec<ToolCallRequest>,
}

pub(crate) async fn drain_response_stream(
    mut stream: atlas_model::ResponseStream,
) -> anyhow::Result<RoundResult> {
    let mut text_chunks = Vec::new();
    struct Builder {
        id: String,
        name: String,
        arguments: String,
    }
    let mut builders: Vec<Option<Builder>> = Vec::new();

    while let Some(event) = stream.next().await {
        match event? {
            ResponseEvent::TextDelta(text) => {
                if !text.is_empty() {
                    text_chunks.push(text);
                }
            }
            ResponseEvent::ToolCall { index, id, name, arguments } => {
                if builders.len() <= index {
                    builders.resize_with(index + 1, || None);
                }
                match &mut builders[index] {
                    Some(b) => b.arguments.push_str(&arguments),
                    None => builders[index] = Some(Builder { id, name, arguments }),
                }
            }
            ResponseEvent::ThinkingDelta(_) | ResponseEvent::Usage { .. } => {}
            ResponseEvent::Done => break,
            ResponseEvent::Error(message) => {
                warn!(error = %message, "llm collaborator reported a recoverable stream error");
            }
        }
    }

    let tool_calls = builders
        .into_iter()
        .flatten()
        .map(|b| {
            let arguments: Value = serde_json::from_str(&b.arguments).unwrap_or(Value::Object(Default::default()));
            ToolCallRequest { id: b.id, name: b.name, arguments }
        })
        .collect();

    Ok(RoundResult { text_chunks, tool_calls })
}

async fn replay_as_stream(chunks: Vec<String>, publisher: &Publisher) -> String {
    let stream = futures::stream::iter(chunks.into_iter().map(Ok));
    stream_and_accumulate(Box::pin(stream), publisher).await
}

// ─── Plain ──────────────────────────────────────────────────────────────────

pub struct PlainRunner {
    pub llm: Arc<dyn LlmClient>,
}

#[async_trait]
impl ModeRunner for PlainRunner {
    async fn run_streaming(
        &self,
        history: &mut ConversationHistory,
        model: &str,
        temperature: f32,
        user_email: Option<&str>,
        publisher: &Publisher,
        cancel: &mut CancelToken,
    ) -> anyhow::Result<String> {
        let model_messages = to_model_messages(history.as_slice());
        let mut cancel_rx = cancel.to_oneshot();
        let token_stream = self
            .llm
            .stream_plain(model, &model_messages, temperature, user_email, &mut cancel_rx)
            .await?;
        let text = stream_and_accumulate(token_stream, publisher).await;
        history.append(Message::assistant(text.clone()));
        Ok(text)
    }
}

// ─── Retrieval ──────────────────────────────────────────────────────────────

pub struct RetrievalRunner {
    pub llm: Arc<dyn LlmClient>,
    pub provider: Arc<dyn RetrievalProvider>,
    pub selected_sources: Vec<String>,
    pub retrieval_timeout: Duration,
    pub retrieval_enabled: bool,
}

#[async_trait]
impl ModeRunner for RetrievalRunner {
    async fn run_streaming(
        &self,
        history: &mut ConversationHistory,
        model: &str,
        temperature: f32,
        user_email: Option<&str>,
        publisher: &Publisher,
        cancel: &mut CancelToken,
    ) -> anyhow::Result<String> {
        let responses = retrieval::query(
            self.provider.as_ref(),
            &self.selected_sources,
            user_email.unwrap_or_default(),
            history.as_slice(),
            self.retrieval_timeout,
            self.retrieval_enabled,
        )
        .await;

        if responses.len() == 1 && responses[0].is_completion {
            let text = emit_as_single_token(responses[0].content.clone(), publisher).await;
            history.append(Message::assistant(text.clone()));
            return Ok(text);
        }

        if responses.is_empty() {
            // All sources failed or none selected: fall back to a plain call
            // with a system note rather than failing the request (§7).
            history.append(Message::system("Retrieval context unavailable; answering without it."));
        } else {
            let context = responses
                .iter()
                .map(|r| format!("[{}]\n{}", r.source_id, r.content))
                .collect::<Vec<_>>()
                .join("\n\n");
            history.append(Message::system(format!("Retrieved context:\n{context}")));
        }

        let model_messages = to_model_messages(history.as_slice());
        let mut cancel_rx = cancel.to_oneshot();
        let token_stream = self
            .llm
            .stream_plain(model, &model_messages, temperature, user_email, &mut cancel_rx)
            .await?;
        let text = stream_and_accumulate(token_stream, publisher).await;
        history.append(Message::assistant(text.clone()));
        Ok(text)
    }
}

// ─── Tools ──────────────────────────────────────────────────────────────────

pub struct ToolsRunner {
    pub llm: Arc<dyn LlmClient>,
    pub mcp: Arc<dyn McpClient>,
    pub executor: ToolExecutor,
    pub selected_tools: Vec<String>,
    pub tool_choice_required: bool,
    pub exec_ctx: ExecutionContext,
}

impl ToolsRunner {
    async fn build_tool_schema(&self) -> anyhow::Result<Vec<atlas_model::ToolSchema>> {
        let tools_by_server = self.mcp.list_tools().await?;
        let selected: std::collections::HashSet<&str> =
            self.selected_tools.iter().map(|s| s.as_str()).collect();
        let schema = tools_by_server
            .values()
            .flatten()
            .filter(|t| selected.contains(t.fully_qualified_name().as_str()))
            .map(|t| atlas_model::ToolSchema {
                name: t.fully_qualified_name(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect();
        Ok(schema)
    }
}

#[async_trait]
impl ModeRunner for ToolsRunner {
    async fn run_streaming(
        &self,
        history: &mut ConversationHistory,
        model: &str,
        temperature: f32,
        user_email: Option<&str>,
        publisher: &Publisher,
        cancel: &mut CancelToken,
    ) -> anyhow::Result<String> {
        let tools_schema = self.build_tool_schema().await?;
        let tool_choice = if self.tool_choice_required { ToolChoice::Required } else { ToolChoice::Auto };

        let mut last_text = String::new();
        for _round in 0..MAX_TOOL_ROUNDS {
            let model_messages = to_model_messages(history.as_slice());
            let mut cancel_rx = cancel.to_oneshot();
            let stream = self
                .llm
                .stream_with_tools(model, &model_messages, &tools_schema, tool_choice, temperature, user_email, &mut cancel_rx)
                .await?;
            let round = drain_response_stream(stream).await?;

            if round.tool_calls.is_empty() {
                let text = replay_as_stream(round.text_chunks, publisher).await;
                history.append(Message::assistant(text.clone()));
                return Ok(text);
            }

            let thought = round.text_chunks.concat();
            if !thought.is_empty() {
                history.append(Message::assistant(thought.clone()));
            }
            last_text = thought;

            let results = self.executor.execute_many(&round.tool_calls, &self.exec_ctx, publisher, &*cancel).await;
            for result in results {
                history.append(Message::tool_result(result.tool_call_id.clone(), result.content.clone()));
            }
        }

        // Bound exceeded: return the last assistant text rather than erroring (§4.2).
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

    fn tool(server: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor {
            server_name: server.into(),
            tool_name: name.into(),
            description: String::new(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn plain_runner_streams_and_appends_assistant_message() {
        let llm = Arc::new(MockLlmClient::always_text("Hi there"));
        let runner = PlainRunner { llm };
        let mut history = ConversationHistory::new();
        history.append(Message::user("Hello"));
        let (publisher, mut rx) = Publisher::new(16);
        let (_source, mut cancel) = CancelSource::new();
        let text = runner
            .run_streaming(&mut history, "m", 0.0, None, &publisher, &mut cancel)
            .await
            .unwrap();
        assert_eq!(text, "Hi there");
        assert_eq!(history.len(), 2);
        drop(publisher);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert!(events.iter().any(|e| matches!(e, crate::events::Event::TokenStream { is_first: true, .. })));
    }

    struct SingleSourceProvider {
        response: crate::retrieval::RetrievalResponse,
    }

    #[async_trait]
    impl RetrievalProvider for SingleSourceProvider {
        async fn discover(&self, _user_email: &str) -> Result<Vec<crate::retrieval::RetrievalSourceInfo>, crate::retrieval::RetrievalError> {
            Ok(vec![])
        }
        async fn query(
            &self,
            _user_email: &str,
            _source_id: &str,
            _messages: &[Message],
        ) -> Result<crate::retrieval::RetrievalResponse, crate::retrieval::RetrievalError> {
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn retrieval_runner_short_circuits_on_single_completion() {
        let llm = Arc::new(MockLlmClient::always_text("unused"));
        let provider = Arc::new(SingleSourceProvider {
            response: crate::retrieval::RetrievalResponse {
                source_id: "policy".into(),
                content: "See policy 3.".into(),
                is_completion: true,
                metadata: None,
            },
        });
        let runner = RetrievalRunner {
            llm,
            provider,
            selected_sources: vec!["policy".into()],
            retrieval_timeout: Duration::from_secs(1),
            retrieval_enabled: true,
        };
        let mut history = ConversationHistory::new();
        history.append(Message::user("What's the policy?"));
        let (publisher, _rx) = Publisher::new(16);
        let (_source, mut cancel) = CancelSource::new();
        let text = runner
            .run_streaming(&mut history, "m", 0.0, None, &publisher, &mut cancel)
            .await
            .unwrap();
        assert_eq!(text, "See policy 3.");
    }

    #[tokio::test]
    async fn tools_runner_single_round_calls_tool_then_finishes() {
        let llm = Arc::new(MockLlmClient::tool_then_text("t1", "calc_add", r#"{"a":2,"b":3}"#, "5"));
        let mcp = Arc::new(
            MockMcpClient::new()
                .with_tool(tool("calc", "add"))
                .script("calc_add", ScriptedTool::Value(serde_json::json!("5"))),
        );
        let executor = ToolExecutor::new(mcp.clone(), ToolPolicy::allow_all(), ApprovalBroker::new(), Duration::from_secs(1));
        let runner = ToolsRunner {
            llm,
            mcp,
            executor,
            selected_tools: vec!["calc_add".into()],
            tool_choice_required: false,
            exec_ctx: ExecutionContext { approval_suppressed: true, ..ExecutionContext::default() },
        };
        let mut history = ConversationHistory::new();
        history.append(Message::user("what is 2+3?"));
        let (publisher, _rx) = Publisher::new(16);
        let (_source, mut cancel) = CancelSource::new();
        let text = runner
            .run_streaming(&mut history, "m", 0.0, None, &publisher, &mut cancel)
            .await
            .unwrap();
        assert_eq!(text, "5");
        assert!(history.iter().any(|m| m.role == crate::message::Role::Tool));
    }
}
