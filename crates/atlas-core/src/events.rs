// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Event Publisher (C4, §4.7): a single-subscriber sink for typed events.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

/// One event delivered to the subscriber (§4.7's nine variants).
#[derive(Debug, Clone)]
pub enum Event {
    TokenStream { token: String, is_first: bool, is_last: bool },
    ToolApprovalRequest {
        tool_call_id: String,
        tool_name: String,
        arguments: Value,
        edit_allowed: bool,
        admin_required: bool,
    },
    ToolStart {
        tool_call_id: String,
        tool_name: String,
        server_name: String,
        arguments: Value,
        agent_mode: bool,
    },
    ToolComplete { tool_call_id: String, success: bool, result: String },
    ToolError { tool_call_id: String, error: String },
    AgentStep { step: u32, kind: String, payload: Value },
    ConversationSaved { conversation_id: String },
    SecurityWarning { status: SecurityStatus, message: String },
    /// Terminal: the request completed with a final assistant answer.
    ChatResponse { content: String },
    /// Terminal: the request ended in error.
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityStatus {
    Warning,
    Blocked,
}

impl Event {
    /// Terminal events close the publisher (§4.7 contract).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::ChatResponse { .. } | Event::Error { .. })
    }
}

/// Single-subscriber sink wrapping an `mpsc::Sender<Event>`.
///
/// Terminal events latch the publisher closed; subsequent publishes are
/// silent no-ops (§4.7). Non-terminal `TokenStream` events MAY be dropped
/// when the subscriber is slow (back-pressure, §5); terminal, approval, and
/// tool-completion events are never dropped — `try_send`'s failure path for
/// those falls back to an awaited `send` so delivery is guaranteed as long
/// as the receiver is still alive.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<Event>,
    terminal: Arc<AtomicBool>,
}

impl Publisher {
    /// Construct a publisher/subscriber pair with the given channel capacity.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, terminal: Arc::new(AtomicBool::new(false)) }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    /// Publish an event. No-op once a terminal event has been published.
    pub async fn publish(&self, event: Event) {
        let was_already_terminal = if event.is_terminal() {
            self.terminal.swap(true, Ordering::SeqCst)
        } else {
            self.terminal.load(Ordering::SeqCst)
        };
        if was_already_terminal {
            // a terminal event was published before this call — silent no-op
            return;
        }
        let must_deliver = event.is_terminal()
            || matches!(
                event,
                Event::ToolApprovalRequest { .. } | Event::ToolComplete { .. } | Event::ToolError { .. }
            );
        if must_deliver {
            if self.tx.send(event).await.is_err() {
                warn!("publisher subscriber dropped; event lost");
            }
        } else {
            // Best-effort for non-terminal token events: never block the
            // producer on a slow subscriber (§5 back-pressure).
            if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(event) {
                warn!("subscriber slow; dropped a non-terminal token_stream event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_response_and_error_are_terminal() {
        assert!(Event::ChatResponse { content: "x".into() }.is_terminal());
        assert!(Event::Error { message: "x".into() }.is_terminal());
    }

    #[test]
    fn token_stream_is_not_terminal() {
        assert!(!(Event::TokenStream { token: "x".into(), is_first: true, is_last: false }.is_terminal()));
    }

    #[tokio::test]
    async fn publisher_delivers_events_in_order() {
        let (pub_, mut rx) = Publisher::new(8);
        pub_.publish(Event::TokenStream { token: "a".into(), is_first: true, is_last: false }).await;
        pub_.publish(Event::TokenStream { token: "b".into(), is_first: false, is_last: false }).await;
        pub_.publish(Event::ChatResponse { content: "ab".into() }).await;

        let e1 = rx.recv().await.unwrap();
        let e2 = rx.recv().await.unwrap();
        let e3 = rx.recv().await.unwrap();
        assert!(matches!(e1, Event::TokenStream { token, .. } if token == "a"));
        assert!(matches!(e2, Event::TokenStream { token, .. } if token == "b"));
        assert!(matches!(e3, Event::ChatResponse { content } if content == "ab"));
    }

    #[tokio::test]
    async fn publish_after_terminal_is_noop() {
        let (pub_, mut rx) = Publisher::new(8);
        pub_.publish(Event::ChatResponse { content: "done".into() }).await;
        pub_.publish(Event::Error { message: "late".into() }).await;
        let only = rx.recv().await.unwrap();
        assert!(matches!(only, Event::ChatResponse { .. }));
        rx.close();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publisher_is_closed_reports_terminal_latch() {
        let (pub_, _rx) = Publisher::new(8);
        assert!(!pub_.is_closed());
        pub_.publish(Event::ChatResponse { content: "x".into() }).await;
        assert!(pub_.is_closed());
    }
}
