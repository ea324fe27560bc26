// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use atlas_core::{
    CancelToken, ChatOptions, ChatOrchestrator, ChatRequest, ChatStatus, Event, InMemoryPersistence,
    KeywordSecurityGate, Publisher, SaveCoordinator, SecurityGate, SessionStore,
};
use atlas_model::MockLlmClient;
use atlas_tools::{MockMcpClient, ScriptedTool, ToolDescriptor};
use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = atlas_config::load(cli.config.as_deref()).context("loading atlas config")?;

    if cli.show_config {
        println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
        return Ok(());
    }

    let message = match &cli.message {
        Some(m) => m.clone(),
        None => {
            print!("> ");
            io::stdout().flush().ok();
            let mut line = String::new();
            io::stdin().read_line(&mut line).context("reading message from stdin")?;
            line.trim_end().to_string()
        }
    };

    let llm = Arc::new(MockLlmClient::tool_then_text(
        "demo-call-1",
        "demo_echo",
        r#"{"text":"hello from atlas"}"#,
        "Done — I called the demo tool and used its result.",
    ));
    let mcp = Arc::new(
        MockMcpClient::new()
            .with_tool(ToolDescriptor {
                server_name: "demo".into(),
                tool_name: "echo".into(),
                description: "Echoes its input argument back".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                }),
            })
            .script("demo_echo", ScriptedTool::Value(serde_json::json!("echoed"))),
    );
    let retrieval = Arc::new(NoRetrievalSources);
    let persistence = Arc::new(InMemoryPersistence::new());
    let input_gate: Arc<dyn SecurityGate> = Arc::new(KeywordSecurityGate::for_input(&config.content_policy));
    let output_gate: Arc<dyn SecurityGate> = Arc::new(KeywordSecurityGate::for_output(&config.content_policy));

    let orchestrator = ChatOrchestrator::new(
        Arc::new(SessionStore::new()),
        llm,
        mcp,
        retrieval,
        Arc::new(SaveCoordinator::new(persistence)),
        input_gate,
        output_gate,
        config,
    );

    let session_id = cli.session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let request = ChatRequest {
        session_id,
        content: message,
        model: "mock".into(),
        user_email: cli.owner,
        selected_tools: if cli.with_tools { vec!["demo_echo".into()] } else { vec![] },
        selected_sources: vec![],
        files: HashMap::new(),
        options: ChatOptions {
            agent_mode: cli.with_tools,
            approval_suppressed: true,
            ..ChatOptions::default()
        },
    };

    let (publisher, mut events) = Publisher::new(64);
    let mut cancel = CancelToken::never();

    let drain = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    let status = orchestrator.execute(request, &publisher, &mut cancel).await;
    drop(publisher);
    let _ = drain.await;

    match status {
        ChatStatus::Completed { content } => {
            println!("\n{content}");
            Ok(())
        }
        ChatStatus::Blocked { reason } => {
            eprintln!("blocked: {reason}");
            std::process::exit(1);
        }
        ChatStatus::Error { message } => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
    }
}

fn print_event(event: &Event) {
    match event {
        Event::TokenStream { token, .. } => {
            print!("{token}");
            io::stdout().flush().ok();
        }
        Event::ToolStart { tool_name, server_name, .. } => {
            tracing::info!(tool = %tool_name, server = %server_name, "tool call started");
        }
        Event::ToolComplete { tool_call_id, success, .. } => {
            tracing::info!(tool_call_id = %tool_call_id, success, "tool call completed");
        }
        Event::AgentStep { step, kind, .. } => {
            tracing::debug!(step, kind = %kind, "agent step");
        }
        Event::SecurityWarning { status, message } => {
            tracing::warn!(?status, %message, "security gate");
        }
        Event::ConversationSaved { conversation_id } => {
            tracing::info!(%conversation_id, "conversation saved");
        }
        Event::Error { message } => {
            tracing::error!(%message, "orchestrator error");
        }
        _ => {}
    }
}

struct NoRetrievalSources;

#[async_trait::async_trait]
impl atlas_core::RetrievalProvider for NoRetrievalSources {
    async fn discover(
        &self,
        _user_email: &str,
    ) -> Result<Vec<atlas_core::RetrievalSourceInfo>, atlas_core::retrieval::RetrievalError> {
        Ok(vec![])
    }

    async fn query(
        &self,
        _user_email: &str,
        source_id: &str,
        _messages: &[atlas_core::Message],
    ) -> Result<atlas_core::RetrievalResponse, atlas_core::retrieval::RetrievalError> {
        Err(atlas_core::retrieval::RetrievalError::UnknownSource(source_id.to_string()))
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("atlas={level}")));
    let _ = tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).try_init();
}
