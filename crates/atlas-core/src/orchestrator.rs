// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Chat Orchestrator (C10): the top-level entry point. Routes one user
//! message to the correct execution mode, applies the security gates around
//! it, and hands the finished turn to the save coordinator.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use atlas_config::{Config, SaveMode};
use atlas_model::LlmClient;
use atlas_tools::{McpClient, ToolPolicy};
use tracing::warn;

use crate::agentic_loop::AgenticLoop;
use crate::approval::ApprovalBroker;
use crate::cancel::CancelToken;
use crate::events::{Event, Publisher, SecurityStatus};
use crate::message::{Message, Role};
use crate::mode_runners::{ModeRunner, PlainRunner, RetrievalRunner, ToolsRunner};
use crate::persistence::SaveCoordinator;
use crate::retrieval::RetrievalProvider;
use crate::security::{SecurityGate, Verdict};
use crate::session_store::SessionStore;
use crate::tool_executor::{ExecutionContext, ToolExecutor};

/// Per-request knobs a caller may override (falls back to configuration
/// defaults when left unset).
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub tool_choice_required: bool,
    pub force_retrieval: bool,
    pub agent_mode: bool,
    pub max_steps: Option<u32>,
    pub temperature: f32,
    pub save_mode: Option<SaveMode>,
    /// Skip the human-in-the-loop approval gate for this request's tool
    /// calls (e.g. a session the user has marked fully trusted).
    pub approval_suppressed: bool,
}

/// One inbound turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub session_id: String,
    pub content: String,
    pub model: String,
    pub user_email: String,
    pub selected_tools: Vec<String>,
    pub selected_sources: Vec<String>,
    pub files: HashMap<String, String>,
    pub options: ChatOptions,
}

/// The terminal outcome of one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStatus {
    Completed { content: String },
    Blocked { reason: String },
    Error { message: String },
}

/// Wires the Session Store, Mode Runners, Agentic Loop, Security Gate, and
/// Save Coordinator behind one entry point.
pub struct ChatOrchestrator {
    sessions: Arc<SessionStore>,
    llm: Arc<dyn LlmClient>,
    mcp: Arc<dyn McpClient>,
    retrieval: Arc<dyn RetrievalProvider>,
    tool_policy: ToolPolicy,
    approval_broker: ApprovalBroker,
    save_coordinator: Arc<SaveCoordinator>,
    input_gate: Arc<dyn SecurityGate>,
    output_gate: Arc<dyn SecurityGate>,
    config: Config,
}

impl ChatOrchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        llm: Arc<dyn LlmClient>,
        mcp: Arc<dyn McpClient>,
        retrieval: Arc<dyn RetrievalProvider>,
        save_coordinator: Arc<SaveCoordinator>,
        input_gate: Arc<dyn SecurityGate>,
        output_gate: Arc<dyn SecurityGate>,
        config: Config,
    ) -> Self {
        let tool_policy = ToolPolicy::from_config(&config.tools);
        Self {
            sessions,
            llm,
            mcp,
            retrieval,
            tool_policy,
            approval_broker: ApprovalBroker::new(),
            save_coordinator,
            input_gate,
            output_gate,
            config,
        }
    }

    fn tool_executor(&self) -> ToolExecutor {
        ToolExecutor::new(
            self.mcp.clone(),
            self.tool_policy.clone(),
            self.approval_broker.clone(),
            Duration::from_secs(self.config.timeouts.mcp_call_timeout_secs),
        )
    }

    pub async fn execute(&self, request: ChatRequest, publisher: &Publisher, cancel: &mut CancelToken) -> ChatStatus {
        // Step 1: acquire the session lock. Subsequent requests for this id wait here.
        let mut session = self
            .sessions
            .acquire(&request.session_id, &request.user_email, self.config.save.default_mode)
            .await;
        if let Some(save_mode) = request.options.save_mode {
            session.save_mode = save_mode;
        }

        // Step 2: attach files and append a manifest message when present.
        for (filename, descriptor) in &request.files {
            session.add_file(filename, descriptor);
        }
        if let Some(manifest) = session.files_manifest_message() {
            session.history.append(Message::system(manifest));
        }

        // Step 3: input content check.
        match self.input_gate.check(&request.content) {
            Verdict::Block { reason } => {
                session.history.clear();
                publisher
                    .publish(Event::SecurityWarning { status: SecurityStatus::Blocked, message: reason.clone() })
                    .await;
                publisher.publish(Event::Error { message: reason.clone() }).await;
                return ChatStatus::Blocked { reason };
            }
            Verdict::Warn { reason } => {
                publisher
                    .publish(Event::SecurityWarning { status: SecurityStatus::Warning, message: reason })
                    .await;
            }
            Verdict::Allow => {}
        }

        // Step 4: append the user message.
        session.history.append(Message::user(request.content.clone()));

        // Step 5: route by request shape.
        let tools_requested = self.config.features.tools_enabled && !request.selected_tools.is_empty();
        let retrieval_requested = self.config.features.retrieval_enabled
            && (!request.selected_sources.is_empty() || request.options.force_retrieval);

        let exec_ctx = ExecutionContext {
            approval_suppressed: request.options.approval_suppressed,
            system_servers: Vec::new(),
            approval_timeout: None,
            agent_mode: request.options.agent_mode,
        };

        let run_result = if tools_requested && request.options.agent_mode {
            let agentic = AgenticLoop {
                llm: self.llm.clone(),
                mcp: self.mcp.clone(),
                executor: self.tool_executor(),
                selected_tools: request.selected_tools.clone(),
                exec_ctx,
                max_steps: request.options.max_steps.unwrap_or(self.config.agent.max_steps),
            };
            agentic
                .run(
                    &mut session.history,
                    &request.model,
                    request.options.temperature,
                    Some(&request.user_email),
                    publisher,
                    cancel,
                )
                .await
        } else if tools_requested {
            let runner = ToolsRunner {
                llm: self.llm.clone(),
                mcp: self.mcp.clone(),
                executor: self.tool_executor(),
                selected_tools: request.selected_tools.clone(),
                tool_choice_required: request.options.tool_choice_required,
                exec_ctx,
            };
            runner
                .run_streaming(
                    &mut session.history,
                    &request.model,
                    request.options.temperature,
                    Some(&request.user_email),
                    publisher,
                    cancel,
                )
                .await
        } else if retrieval_requested {
            let runner = RetrievalRunner {
                llm: self.llm.clone(),
                provider: self.retrieval.clone(),
                selected_sources: request.selected_sources.clone(),
                retrieval_timeout: Duration::from_secs(self.config.timeouts.retrieval_timeout_secs),
                retrieval_enabled: self.config.features.retrieval_enabled,
            };
            runner
                .run_streaming(
                    &mut session.history,
                    &request.model,
                    request.options.temperature,
                    Some(&request.user_email),
                    publisher,
                    cancel,
                )
                .await
        } else {
            let runner = PlainRunner { llm: self.llm.clone() };
            runner
                .run_streaming(
                    &mut session.history,
                    &request.model,
                    request.options.temperature,
                    Some(&request.user_email),
                    publisher,
                    cancel,
                )
                .await
        };

        // Cancellation discards any partial assistant message the runner may
        // have appended, leaving history at "user message appended, nothing
        // after it" (§5 Cancellation).
        if cancel.is_cancelled() {
            session.history.remove_last_if(Role::Assistant);
            return ChatStatus::Error { message: "request cancelled".into() };
        }

        let text = match run_result {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "mode runner failed");
                session.history.remove_last_if(Role::Assistant);
                publisher.publish(Event::Error { message: e.to_string() }).await;
                return ChatStatus::Error { message: e.to_string() };
            }
        };

        // A terminal event may already have been published mid-stream (the
        // accumulator emits `error` and stops short of `is_last` on a
        // collaborator failure); the dangling partial assistant message it
        // still appended is discarded rather than surfaced as a reply.
        if publisher.is_closed() {
            session.history.remove_last_if(Role::Assistant);
            return ChatStatus::Error { message: "assistant response did not complete".into() };
        }

        // Step 6: output content check.
        match self.output_gate.check(&text) {
            Verdict::Block { reason } => {
                session.history.remove_last_if(Role::Assistant);
                session.history.clear();
                publisher
                    .publish(Event::SecurityWarning { status: SecurityStatus::Blocked, message: reason.clone() })
                    .await;
                publisher.publish(Event::Error { message: reason.clone() }).await;
                return ChatStatus::Blocked { reason };
            }
            Verdict::Warn { reason } => {
                publisher
                    .publish(Event::SecurityWarning { status: SecurityStatus::Warning, message: reason })
                    .await;
            }
            Verdict::Allow => {}
        }

        // Step 7: save coordinator.
        self.save_coordinator
            .finish(session.save_mode, &session.owner_email, session.history.as_slice(), publisher)
            .await;

        // Step 8: terminal event and release (the guard drops at function end).
        publisher.publish(Event::ChatResponse { content: text.clone() }).await;
        session.touch();
        ChatStatus::Completed { content: text }
    }
}

impl std::fmt::Debug for ChatOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOrchestrator").finish_non_exhaustive()
    }
}
