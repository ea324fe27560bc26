// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Approval Broker (C11, §4.8). Correlates outgoing `tool_approval_request`
//! events with the `tool_approval_response` messages returning from the
//! transport shell, keyed by tool-call id.
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::cancel::CancelToken;

/// An approval ticket's resolution (§3 Approval Ticket, §4.8).
#[derive(Debug, Clone)]
pub enum ApprovalResponse {
    Approve { edited_arguments: Option<Value> },
    Reject { reason: String },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitError {
    /// The broker's sender side was dropped without a response arriving
    /// (e.g. the session was torn down while a ticket was outstanding).
    Abandoned,
    /// The timeout elapsed with no response (§4.8: "no timeout" is the
    /// default when a human is expected, so this only fires when the
    /// caller passes an explicit timeout).
    TimedOut,
}

/// Maintains `tool_call_id -> pending ticket` (§4.8).
#[derive(Clone, Default)]
pub struct ApprovalBroker {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<ApprovalResponse>>>>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new ticket and wait for its resolution. `timeout: None`
    /// waits indefinitely (the §4.8 default for human-in-the-loop gates).
    /// `cancel` resolves the wait early with `Err(AwaitError::Abandoned)` if
    /// the request's cancellation token fires first.
    pub async fn await_response(
        &self,
        tool_call_id: &str,
        timeout: Option<std::time::Duration>,
        cancel: &mut CancelToken,
    ) -> Result<ApprovalResponse, AwaitError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(tool_call_id.to_string(), tx);

        let wait = async {
            tokio::select! {
                res = rx => res.map_err(|_| AwaitError::Abandoned),
                _ = cancel.cancelled() => Err(AwaitError::Abandoned),
            }
        };

        let result = match timeout {
            Some(d) => match tokio::time::timeout(d, wait).await {
                Ok(r) => r,
                Err(_) => Err(AwaitError::TimedOut),
            },
            None => wait.await,
        };
        self.pending.lock().await.remove(tool_call_id);
        result
    }

    /// Resolve a pending ticket (called when the transport shell delivers a
    /// `tool_approval_response` message). Returns `false` if no ticket with
    /// that id is outstanding (already resolved or unknown id).
    pub async fn resolve(&self, tool_call_id: &str, response: ApprovalResponse) -> bool {
        if let Some(tx) = self.pending.lock().await.remove(tool_call_id) {
            tx.send(response).is_ok()
        } else {
            false
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
