// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod protocol;
pub mod service;

pub use protocol::{ControlCommand, ControlEvent, SessionInfo, SessionState};
pub use service::{AgentHandle, ControlService};
