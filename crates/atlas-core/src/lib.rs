// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod agentic_loop;
pub mod approval;
pub mod cancel;
pub mod errors;
pub mod events;
pub mod message;
pub mod mode_runners;
pub mod orchestrator;
pub mod persistence;
pub mod retrieval;
pub mod security;
pub mod session;
pub mod session_store;
pub mod streaming;
pub mod tool_executor;

pub use agentic_loop::{AgentStep, AgentStepKind, AgenticLoop};
pub use approval::{ApprovalBroker, ApprovalResponse, AwaitError};
pub use cancel::{CancelSource, CancelToken};
pub use errors::OrchestratorError;
pub use events::{Event, Publisher, SecurityStatus};
pub use message::{ConversationHistory, Message, MessageMetadata, Role};
pub use mode_runners::{ModeRunner, PlainRunner, RetrievalRunner, ToolsRunner};
pub use orchestrator::{ChatOrchestrator, ChatRequest, ChatStatus};
pub use persistence::{InMemoryPersistence, Persistence, PersistenceError, SaveCoordinator};
pub use retrieval::{query as query_retrieval, RetrievalProvider, RetrievalResponse, RetrievalSourceInfo};
pub use security::{KeywordSecurityGate, SecurityGate, Verdict};
pub use session::{FileHandle, Session};
pub use session_store::SessionStore;
pub use streaming::{emit_as_single_token, stream_and_accumulate};
pub use tool_executor::{describe_fleet, ApprovalTicket, ExecutionContext, ToolExecutor};
