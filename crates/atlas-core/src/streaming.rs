// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Streaming Accumulator (C5, §4.6).
use futures::{Stream, StreamExt};
use tracing::warn;

use crate::events::{Event, Publisher};

/// Consume a finite token stream, publish one `TokenStream` event per token
/// plus a final `is_last` sentinel, and return the concatenated text.
///
/// Ordering guarantee: events for this call are published strictly in
/// arrival order with no interleaving (caller must not run two concurrent
/// `stream_and_accumulate` calls against the same publisher, §4.6).
pub async fn stream_and_accumulate<S>(mut token_source: S, publisher: &Publisher) -> String
where
    S: Stream<Item = anyhow::Result<String>> + Unpin,
{
    let mut accumulated = String::new();
    let mut is_first = true;
    loop {
        match token_source.next().await {
            Some(Ok(token)) => {
                if token.is_empty() {
                    continue;
                }
                accumulated.push_str(&token);
                publisher
                    .publish(Event::TokenStream { token, is_first, is_last: false })
                    .await;
                is_first = false;
            }
            Some(Err(e)) => {
                warn!(error = %e, "token source errored mid-stream");
                publisher.publish(Event::Error { message: e.to_string() }).await;
                return accumulated;
            }
            None => break,
        }
    }
    publisher
        .publish(Event::TokenStream { token: String::new(), is_first: false, is_last: true })
        .await;
    accumulated
}

/// Emit a single string as a one-token pseudo-stream (used when a retrieval
/// source's completion becomes the final answer, §4.2 Retrieval mode).
pub async fn emit_as_single_token(text: String, publisher: &Publisher) -> String {
    let stream = futures::stream::iter(vec![Ok(text.clone())]);
    stream_and_accumulate(Box::pin(stream), publisher).await;
    text
}
