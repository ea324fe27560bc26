// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Retrieval Fan-out (C7). Queries N retrieval sources concurrently through
//! a single collaborator interface, best-effort: one source failing never
//! fails the whole operation. Grounded on the teacher's HTTP-calling tools
//! (`reqwest::Client` with a per-call timeout) for the transport shape, and
//! on the tool executor's concurrent-dispatch pattern for the fan-out shape.
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::message::Message;

/// One retrieval source as surfaced to a tool/source picker UI.
#[derive(Debug, Clone)]
pub struct RetrievalSourceInfo {
    pub id: String,
    pub label: String,
    pub description: String,
    pub compliance_level: String,
}

/// One source's answer to a retrieval query.
///
/// Invariant: when `is_completion` is true the content is a final assistant
/// answer and is not passed back through an LLM unless combined with other
/// retrieval responses.
#[derive(Debug, Clone)]
pub struct RetrievalResponse {
    pub source_id: String,
    pub content: String,
    pub is_completion: bool,
    pub metadata: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("unknown retrieval source: {0}")]
    UnknownSource(String),
    #[error("retrieval transport error: {0}")]
    Transport(String),
}

/// The retrieval collaborator (§6): discovery plus per-source query.
/// Implementations own transport to whatever backs each source (HTTP
/// endpoint or MCP tool); callers never see that distinction.
#[async_trait]
pub trait RetrievalProvider: Send + Sync {
    async fn discover(&self, user_email: &str) -> Result<Vec<RetrievalSourceInfo>, RetrievalError>;

    async fn query(
        &self,
        user_email: &str,
        source_id: &str,
        messages: &[Message],
    ) -> Result<RetrievalResponse, RetrievalError>;
}

/// Query `sources` concurrently against `provider`, best-effort. Failures
/// are logged and omitted from the result; a failing source never aborts
/// its siblings. Result order matches `sources`' input order.
pub async fn query(
    provider: &(dyn RetrievalProvider),
    sources: &[String],
    user_email: &str,
    messages: &[Message],
    per_source_timeout: Duration,
    retrieval_enabled: bool,
) -> Vec<RetrievalResponse> {
    if !retrieval_enabled || sources.is_empty() {
        return Vec::new();
    }

    // `provider` is a `&dyn` reference rather than an `Arc`, so sources are
    // raced concurrently in-place via `join_all` rather than `tokio::spawn`
    // (which would require `'static` ownership); each query's own I/O still
    // overlaps with its siblings.
    let futures = sources.iter().map(|source_id| {
        async move {
            let result = tokio::time::timeout(
                per_source_timeout,
                provider.query(user_email, source_id, messages),
            )
            .await;
            match result {
                Ok(Ok(response)) => Some(response),
                Ok(Err(e)) => {
                    warn!(source_id = %source_id, error = %e, "retrieval source failed");
                    None
                }
                Err(_) => {
                    warn!(source_id = %source_id, "retrieval source timed out");
                    None
                }
            }
        }
    });

    futures::future::join_all(futures).await.into_iter().flatten().collect()
}

/// Discovery: enumerate sources known to the configured provider. Best-effort
/// at the provider level — a discovery failure yields an empty list rather
/// than propagating, mirroring `query`'s fail-open stance.
pub async fn discover(provider: &(dyn RetrievalProvider), user_email: &str, retrieval_enabled: bool) -> Vec<RetrievalSourceInfo> {
    if !retrieval_enabled {
        return Vec::new();
    }
    match provider.discover(user_email).await {
        Ok(sources) => sources,
        Err(e) => {
            warn!(error = %e, "retrieval discovery failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct ScriptedProvider {
        responses: HashMap<String, Result<RetrievalResponse, String>>,
        delays: HashMap<String, Duration>,
        sources: Vec<RetrievalSourceInfo>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RetrievalProvider for ScriptedProvider {
        async fn discover(&self, _user_email: &str) -> Result<Vec<RetrievalSourceInfo>, RetrievalError> {
            Ok(self.sources.clone())
        }

        async fn query(
            &self,
            _user_email: &str,
            source_id: &str,
            _messages: &[Message],
        ) -> Result<RetrievalResponse, RetrievalError> {
            self.calls.lock().unwrap().push(source_id.to_string());
            if let Some(delay) = self.delays.get(source_id) {
                tokio::time::sleep(*delay).await;
            }
            match self.responses.get(source_id) {
                Some(Ok(r)) => Ok(r.clone()),
                Some(Err(e)) => Err(RetrievalError::Transport(e.clone())),
                None => Err(RetrievalError::UnknownSource(source_id.to_string())),
            }
        }
    }

    fn resp(source_id: &str, content: &str, is_completion: bool) -> RetrievalResponse {
        RetrievalResponse { source_id: source_id.into(), content: content.into(), is_completion, metadata: None }
    }

    #[tokio::test]
    async fn best_effort_omits_failing_source() {
        let provider = ScriptedProvider {
            responses: HashMap::from([
                ("good".to_string(), Ok(resp("good", "ctx", false))),
                ("bad".to_string(), Err("boom".to_string())),
            ]),
            delays: HashMap::new(),
            sources: vec![],
            calls: Mutex::new(Vec::new()),
        };
        let results = query(
            &provider,
            &["good".to_string(), "bad".to_string()],
            "u@example.com",
            &[],
            Duration::from_secs(1),
            true,
        )
        .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, "good");
    }

    #[tokio::test]
    async fn disabled_feature_flag_returns_empty_without_calling_provider() {
        let provider = ScriptedProvider {
            responses: HashMap::from([("good".to_string(), Ok(resp("good", "ctx", false)))]),
            delays: HashMap::new(),
            sources: vec![],
            calls: Mutex::new(Vec::new()),
        };
        let results = query(&provider, &["good".to_string()], "u@example.com", &[], Duration::from_secs(1), false).await;
        assert!(results.is_empty());
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_completion_source_is_flagged() {
        let provider = ScriptedProvider {
            responses: HashMap::from([("policy".to_string(), Ok(resp("policy", "See policy 3.", true)))]),
            delays: HashMap::new(),
            sources: vec![],
            calls: Mutex::new(Vec::new()),
        };
        let results = query(&provider, &["policy".to_string()], "u@example.com", &[], Duration::from_secs(1), true).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_completion);
    }

    #[tokio::test]
    async fn queries_run_concurrently_not_sequentially() {
        let provider = ScriptedProvider {
            responses: HashMap::from([
                ("a".to_string(), Ok(resp("a", "1", false))),
                ("b".to_string(), Ok(resp("b", "2", false))),
            ]),
            delays: HashMap::from([
                ("a".to_string(), Duration::from_millis(40)),
                ("b".to_string(), Duration::from_millis(40)),
            ]),
            sources: vec![],
            calls: Mutex::new(Vec::new()),
        };
        let start = std::time::Instant::now();
        let results = query(
            &provider,
            &["a".to_string(), "b".to_string()],
            "u@example.com",
            &[],
            Duration::from_secs(1),
            true,
        )
        .await;
        assert!(start.elapsed() < Duration::from_millis(75));
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn timed_out_source_is_omitted() {
        let provider = ScriptedProvider {
            responses: HashMap::from([("slow".to_string(), Ok(resp("slow", "x", false)))]),
            delays: HashMap::from([("slow".to_string(), Duration::from_millis(50))]),
            sources: vec![],
            calls: Mutex::new(Vec::new()),
        };
        let results = query(&provider, &["slow".to_string()], "u@example.com", &[], Duration::from_millis(10), true).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn discover_returns_empty_when_disabled() {
        let provider = ScriptedProvider {
            responses: HashMap::new(),
            delays: HashMap::new(),
            sources: vec![RetrievalSourceInfo {
                id: "policy".into(),
                label: "Policy".into(),
                description: "Policy docs".into(),
                compliance_level: "public".into(),
            }],
            calls: Mutex::new(Vec::new()),
        };
        assert!(discover(&provider, "u@example.com", false).await.is_empty());
        let found = discover(&provider, "u@example.com", true).await;
        assert_eq!(found.len(), 1);
    }
}
