// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Error taxonomy (§7). Only invariant violations are `Err` returns from the
//! orchestrator boundary; every other listed failure mode is absorbed into
//! an `Event` (§7 propagation policy).
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("session {0} is already held by another in-flight request")]
    SessionLockMisuse(String),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}
