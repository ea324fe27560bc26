// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The LLM collaborator interface: the trait the orchestration layer talks
//! to, plus the wire-adjacent message/content types shared with the rest of
//! the workspace and a scriptable mock implementation for tests.

mod mock;
mod provider;
mod types;

pub use mock::{MockLlmClient, ScriptedReply};
pub use provider::{is_cancelled, LlmClient, ResponseStream, TokenStream, ToolChoice};
pub use types::*;
