// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Request-scoped cancellation (§5). Every request carries one token that
//! propagates to the LLM streaming call, all in-flight tool executions, and
//! retrieval calls. Built on `tokio::sync::watch` (rather than the
//! single-shot `oneshot` the teacher uses for its one-call-at-a-time CLI
//! turn) because this spec requires fanning the same cancellation out to
//! many concurrently-spawned tasks (§4.3, §4.4 point 5, §4.5).
use tokio::sync::{oneshot, watch};

#[derive(Clone)]
pub struct CancelToken(watch::Receiver<bool>);

pub struct CancelSource(watch::Sender<bool>);

impl CancelSource {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self(tx), CancelToken(rx))
    }

    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

impl CancelToken {
    /// A token that never cancels, for call sites with no surrounding request.
    pub fn never() -> Self {
        let (_src, token) = CancelSource::new();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the token is cancelled. Safe to await concurrently from
    /// clones of the same token.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        while self.0.changed().await.is_ok() {
            if self.is_cancelled() {
                return;
            }
        }
    }

    /// Bridge to the single-shot `oneshot::Receiver<()>` contract used by
    /// [`atlas_model::LlmClient`] — spawns a small forwarding task that
    /// resolves the oneshot when this token cancels.
    pub fn to_oneshot(&self) -> oneshot::Receiver<()> {
        let mut token = self.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            token.cancelled().await;
            let _ = tx.send(());
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_up_waiters() {
        let (source, mut token) = CancelSource::new();
        assert!(!token.is_cancelled());
        let waiter = tokio::spawn(async move {
            token.cancelled().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        source.cancel();
        tokio::time::timeout(std::time::Duration::from_millis(50), waiter)
            .await
            .expect("waiter should resolve after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn clones_observe_the_same_cancellation() {
        let (source, token) = CancelSource::new();
        let mut a = token.clone();
        let mut b = token.clone();
        source.cancel();
        a.cancelled().await;
        b.cancelled().await;
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_returns_immediately() {
        let (source, token) = CancelSource::new();
        source.cancel();
        let mut t = token.clone();
        tokio::time::timeout(std::time::Duration::from_millis(10), t.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn to_oneshot_resolves_on_cancel() {
        let (source, token) = CancelSource::new();
        let mut rx = token.to_oneshot();
        source.cancel();
        tokio::time::timeout(std::time::Duration::from_millis(50), &mut rx)
            .await
            .unwrap()
            .unwrap();
    }
}
