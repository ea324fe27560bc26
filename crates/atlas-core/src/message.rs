// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Message and Conversation History data model (§3 Message, C2).
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role that authored a [`Message`] (§3 invariant: one of these four).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Streaming/provenance metadata carried alongside a message (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// True while an assistant message is still being streamed.
    #[serde(default)]
    pub streaming: bool,
    /// The tool that produced a tool-role message's content.
    #[serde(default)]
    pub tool_name: Option<String>,
    /// The MCP server that served the tool.
    #[serde(default)]
    pub server_name: Option<String>,
}

/// One message in a conversation history (§3 Message).
///
/// Invariant: a `Role::Tool` message always carries `tool_call_id`, matching
/// a prior assistant tool call — enforced by [`Message::tool_result`], the
/// only constructor that sets `Role::Tool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            timestamp: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            timestamp: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            timestamp: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    /// A tool-role message paired with the tool call it answers (§3 invariant).
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            timestamp: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    /// Approximate token count, a 4-chars-per-token heuristic used only as
    /// an ambient diagnostic — never gates admission.
    pub fn approx_tokens(&self) -> usize {
        (self.content.len() / 4).max(1)
    }

    /// Project onto the wire-adjacent message type the LLM collaborator
    /// interface speaks.
    pub fn to_model_message(&self) -> atlas_model::Message {
        match self.role {
            Role::User => atlas_model::Message::user(self.content.clone()),
            Role::Assistant => atlas_model::Message::assistant(self.content.clone()),
            Role::System => atlas_model::Message::system(self.content.clone()),
            Role::Tool => atlas_model::Message::tool_result(
                self.tool_call_id.clone().unwrap_or_default(),
                self.content.clone(),
            ),
        }
    }
}

/// Project a whole history onto the LLM collaborator's message type, in order.
pub fn to_model_messages(messages: &[Message]) -> Vec<atlas_model::Message> {
    messages.iter().map(Message::to_model_message).collect()
}

/// The ordered, appendable message log owned by a [`crate::session::Session`]
/// (C2). Append preserves arrival order; truncate clears the whole log
/// (§9 Open Question: full clear chosen for safety on blocked content).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Remove the last message if it matches `role` — used to undo a
    /// just-appended assistant message on output-block (§7 Output blocked).
    pub fn remove_last_if(&mut self, role: Role) -> Option<Message> {
        if self.messages.last().map(|m| m.role) == Some(role) {
            self.messages.pop()
        } else {
            None
        }
    }

    /// Clear the entire history (§8 invariant 5: blocked content clears history).
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_always_carries_tool_call_id() {
        let m = Message::tool_result("call-1", "output");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn user_and_assistant_messages_have_no_tool_call_id() {
        assert!(Message::user("hi").tool_call_id.is_none());
        assert!(Message::assistant("hi").tool_call_id.is_none());
    }

    #[test]
    fn history_append_preserves_order() {
        let mut h = ConversationHistory::new();
        h.append(Message::user("1"));
        h.append(Message::assistant("2"));
        let texts: Vec<&str> = h.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["1", "2"]);
    }

    #[test]
    fn history_clear_empties_messages() {
        let mut h = ConversationHistory::new();
        h.append(Message::user("1"));
        h.clear();
        assert_eq!(h.len(), 0);
        assert!(h.is_empty());
    }

    #[test]
    fn remove_last_if_matching_role_pops_it() {
        let mut h = ConversationHistory::new();
        h.append(Message::user("q"));
        h.append(Message::assistant("partial"));
        let removed = h.remove_last_if(Role::Assistant);
        assert!(removed.is_some());
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn remove_last_if_non_matching_role_is_noop() {
        let mut h = ConversationHistory::new();
        h.append(Message::user("q"));
        let removed = h.remove_last_if(Role::Assistant);
        assert!(removed.is_none());
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        assert_eq!(Message::user("").approx_tokens(), 1);
    }

    #[test]
    fn tool_message_carries_tool_call_id_into_model_message() {
        let m = Message::tool_result("call-1", "ok");
        let model_msg = m.to_model_message();
        assert_eq!(model_msg.as_text(), None);
        match model_msg.content {
            atlas_model::MessageContent::ToolResult { tool_call_id, .. } => {
                assert_eq!(tool_call_id, "call-1");
            }
            _ => panic!("expected ToolResult content"),
        }
    }

    #[test]
    fn to_model_messages_preserves_order() {
        let history = vec![Message::user("a"), Message::assistant("b")];
        let converted = to_model_messages(&history);
        assert_eq!(converted[0].as_text(), Some("a"));
        assert_eq!(converted[1].as_text(), Some("b"));
    }
}
