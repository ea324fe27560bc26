// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::Parser;

/// Atlas — a chat orchestration core.
///
/// This binary is a thin, non-interactive demonstration of wiring
/// `atlas-core`'s `ChatOrchestrator` with scripted mock collaborators
/// (model, MCP tools, retrieval, persistence). It drives a single chat
/// turn end-to-end and prints the resulting event stream. The real
/// HTTP/WebSocket transport shell, auth middleware, and CLI glue that
/// would front this core in production are out of scope (see spec §1) —
/// a real deployment wires the same `ChatOrchestrator` behind its own
/// transport instead of this demo loop.
#[derive(Parser, Debug)]
#[command(name = "atlas", version, about)]
pub struct Cli {
    /// Path to a config file overriding the layered config search path.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Resume an existing session id instead of starting a fresh one
    /// (a fresh `uuid::Uuid::new_v4()` id is generated when omitted).
    #[arg(long)]
    pub session: Option<String>,

    /// The user message to send. If omitted, reads a single line from stdin.
    #[arg(long, short = 'm')]
    pub message: Option<String>,

    /// Owner email attached to the session (affects save-mode and
    /// persistence scoping).
    #[arg(long, default_value = "demo@example.com")]
    pub owner: String,

    /// Run the agentic tool loop instead of a plain chat turn. Wires a
    /// scripted mock MCP server exposing a single `demo_echo` tool.
    #[arg(long)]
    pub with_tools: bool,

    /// Increase log verbosity (stderr). Repeat for more detail.
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print the resolved configuration and exit.
    #[arg(long)]
    pub show_config: bool,
}
