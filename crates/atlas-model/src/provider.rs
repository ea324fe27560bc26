// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio::sync::oneshot;

use crate::{Message, ResponseEvent, ToolSchema};

/// A finite sequence of plain text tokens as they arrive from the model.
pub type TokenStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// A finite sequence of richer events (text deltas, tool call fragments,
/// completion) produced while the model is also allowed to call tools.
pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// Whether the model must invoke a tool or is free to answer in plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    Required,
}

/// The LLM collaborator: the only way the orchestration layer talks to a
/// language model. Implementations own transport, auth, and retry policy;
/// callers only ever see a token/event stream plus a cancellation signal.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Stream a plain-text completion with no tool schema attached.
    ///
    /// `cancel` is polled by the implementation between chunks; once it
    /// fires the returned stream should end (with or without a trailing
    /// partial token) rather than continue to completion.
    async fn stream_plain(
        &self,
        model: &str,
        messages: &[Message],
        temperature: f32,
        user_email: Option<&str>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<TokenStream>;

    /// Stream a completion where the model may emit tool calls instead of
    /// (or interleaved with) text. Tool calls may arrive incrementally as
    /// `ResponseEvent::ToolCall` fragments; callers accumulate them by index.
    async fn stream_with_tools(
        &self,
        model: &str,
        messages: &[Message],
        tools_schema: &[ToolSchema],
        tool_choice: ToolChoice,
        temperature: f32,
        user_email: Option<&str>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<ResponseStream>;
}

/// Cancellation already observed before streaming started.
pub fn is_cancelled(cancel: &mut oneshot::Receiver<()>) -> bool {
    !matches!(cancel.try_recv(), Err(oneshot::error::TryRecvError::Empty))
}
