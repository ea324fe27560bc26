// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use tokio::sync::oneshot;

use crate::provider::{ResponseStream, TokenStream};
use crate::{LlmClient, Message, ResponseEvent, Role, ToolChoice, ToolSchema};

/// One scripted response: either plain text tokens or a tool call followed
/// by text, queued in call order. `tool_then_text` scenarios consume two
/// entries — one per model turn — mirroring how a real provider round-trips
/// a tool result back through another `stream_with_tools` call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(Vec<String>),
    ToolCall { id: String, name: String, arguments: String },
}

/// Deterministic, network-free LLM collaborator for tests.
///
/// Without a script, `stream_plain`/`stream_with_tools` echo the last user
/// message back as a single token prefixed with `MOCK:`, exactly the way
/// the teacher's bare `MockProvider` behaves. With a script installed via
/// [`MockLlmClient::scripted`], each call pops the next entry off the front
/// of the queue.
pub struct MockLlmClient {
    scripts: Mutex<Vec<ScriptedReply>>,
    pub last_messages: Mutex<Option<Vec<Message>>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self { scripts: Mutex::new(Vec::new()), last_messages: Mutex::new(None) }
    }
}

impl MockLlmClient {
    pub fn scripted(scripts: Vec<ScriptedReply>) -> Self {
        Self { scripts: Mutex::new(scripts), last_messages: Mutex::new(None) }
    }

    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::scripted(vec![ScriptedReply::Text(vec![reply.into()])])
    }

    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::scripted(vec![
            ScriptedReply::ToolCall { id: tool_id.into(), name: tool_name.into(), arguments: args_json.into() },
            ScriptedReply::Text(vec![final_text.into()]),
        ])
    }

    fn last_user_text(messages: &[Message]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string()
    }

    fn pop_script(&self) -> Option<ScriptedReply> {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            None
        } else {
            Some(scripts.remove(0))
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn stream_plain(
        &self,
        _model: &str,
        messages: &[Message],
        _temperature: f32,
        _user_email: Option<&str>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<TokenStream> {
        *self.last_messages.lock().unwrap() = Some(messages.to_vec());
        if crate::is_cancelled(cancel) {
            return Ok(Box::pin(stream::iter(Vec::new())));
        }
        let tokens: Vec<anyhow::Result<String>> = match self.pop_script() {
            Some(ScriptedReply::Text(toks)) => toks.into_iter().map(Ok).collect(),
            Some(ScriptedReply::ToolCall { .. }) => {
                vec![Ok("[tool call script used with stream_plain]".to_string())]
            }
            None => vec![Ok(format!("MOCK: {}", Self::last_user_text(messages)))],
        };
        Ok(Box::pin(stream::iter(tokens)))
    }

    async fn stream_with_tools(
        &self,
        _model: &str,
        messages: &[Message],
        _tools_schema: &[ToolSchema],
        _tool_choice: ToolChoice,
        _temperature: f32,
        _user_email: Option<&str>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<ResponseStream> {
        *self.last_messages.lock().unwrap() = Some(messages.to_vec());
        if crate::is_cancelled(cancel) {
            return Ok(Box::pin(stream::iter(Vec::new())));
        }
        let events: Vec<anyhow::Result<ResponseEvent>> = match self.pop_script() {
            Some(ScriptedReply::Text(toks)) => toks
                .into_iter()
                .map(|t| Ok(ResponseEvent::TextDelta(t)))
                .chain(std::iter::once(Ok(ResponseEvent::Done)))
                .collect(),
            Some(ScriptedReply::ToolCall { id, name, arguments }) => vec![
                Ok(ResponseEvent::ToolCall { index: 0, id, name, arguments }),
                Ok(ResponseEvent::Done),
            ],
            None => vec![
                Ok(ResponseEvent::TextDelta(format!("MOCK: {}", Self::last_user_text(messages)))),
                Ok(ResponseEvent::Done),
            ],
        };
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn cancel_pair() -> (oneshot::Sender<()>, oneshot::Receiver<()>) {
        oneshot::channel()
    }

    #[tokio::test]
    async fn plain_echoes_last_user_message() {
        let client = MockLlmClient::default();
        let (_tx, mut rx) = cancel_pair();
        let mut s = client
            .stream_plain("m", &[Message::user("hi")], 0.0, None, &mut rx)
            .await
            .unwrap();
        let first = s.next().await.unwrap().unwrap();
        assert_eq!(first, "MOCK: hi");
    }

    #[tokio::test]
    async fn plain_returns_nothing_when_already_cancelled() {
        let client = MockLlmClient::default();
        let (tx, mut rx) = cancel_pair();
        tx.send(()).unwrap();
        let mut s = client
            .stream_plain("m", &[Message::user("hi")], 0.0, None, &mut rx)
            .await
            .unwrap();
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn scripted_tool_then_text_two_calls() {
        let client = MockLlmClient::tool_then_text("call-1", "search", r#"{"q":"rust"}"#, "done");
        let (_tx, mut rx) = cancel_pair();

        let mut s1 = client
            .stream_with_tools("m", &[Message::user("go")], &[], ToolChoice::Auto, 0.0, None, &mut rx)
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Some(e) = s1.next().await {
            events.push(e.unwrap());
        }
        assert!(events.iter().any(|e| matches!(e, ResponseEvent::ToolCall { name, .. } if name == "search")));

        let mut s2 = client
            .stream_with_tools("m", &[Message::user("go")], &[], ToolChoice::Auto, 0.0, None, &mut rx)
            .await
            .unwrap();
        let mut events2 = Vec::new();
        while let Some(e) = s2.next().await {
            events2.push(e.unwrap());
        }
        assert!(events2.iter().any(|e| matches!(e, ResponseEvent::TextDelta(t) if t == "done")));
    }

    #[tokio::test]
    async fn scripted_fallback_when_exhausted() {
        let client = MockLlmClient::scripted(vec![]);
        let (_tx, mut rx) = cancel_pair();
        let mut s = client
            .stream_plain("m", &[Message::user("x")], 0.0, None, &mut rx)
            .await
            .unwrap();
        let ev = s.next().await.unwrap().unwrap();
        assert!(ev.contains("MOCK:"));
    }
}
