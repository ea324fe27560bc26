// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session data model (§3 Session).
use std::collections::HashMap;

use atlas_config::SaveMode;
use chrono::{DateTime, Utc};

use crate::message::ConversationHistory;

/// An attached file's content handle. File storage backends and content
/// extraction are out of scope (§1); this is the opaque reference the
/// orchestrator threads through to a files manifest system message.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub filename: String,
    /// Opaque descriptor (e.g. a storage URI or base64 payload) — never
    /// interpreted by the orchestration core itself.
    pub descriptor: String,
}

/// The authoritative per-session state (§3 Session).
///
/// Ownership: a session exclusively owns its history and files map; the
/// orchestrator holds only a transient locked reference during a request
/// (enforced by [`crate::session_store::SessionStore`]).
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub owner_email: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub save_mode: SaveMode,
    pub history: ConversationHistory,
    pub files: HashMap<String, FileHandle>,
    pub selected_tools: std::collections::HashSet<String>,
    pub selected_sources: Vec<String>,
    pub active_prompt_id: Option<String>,
}

impl Session {
    pub fn new(id: impl Into<String>, owner_email: impl Into<String>, save_mode: SaveMode) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner_email: owner_email.into(),
            created_at: now,
            last_activity: now,
            save_mode,
            history: ConversationHistory::new(),
            files: HashMap::new(),
            selected_tools: std::collections::HashSet::new(),
            selected_sources: Vec::new(),
            active_prompt_id: None,
        }
    }

    /// Derived from `save_mode` (§3 Session invariants).
    pub fn incognito(&self) -> bool {
        self.save_mode == SaveMode::None
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn add_file(&mut self, filename: impl Into<String>, descriptor: impl Into<String>) {
        let filename = filename.into();
        self.files.insert(
            filename.clone(),
            FileHandle { filename, descriptor: descriptor.into() },
        );
    }

    /// Build the system message announcing attached files (§4.1 step 2).
    /// `None` when no files are attached this turn.
    pub fn files_manifest_message(&self) -> Option<String> {
        if self.files.is_empty() {
            return None;
        }
        let mut names: Vec<&str> = self.files.keys().map(|s| s.as_str()).collect();
        names.sort();
        Some(format!("Attached files: {}", names.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incognito_true_only_for_none_save_mode() {
        let s = Session::new("s1", "a@b.com", SaveMode::None);
        assert!(s.incognito());
        let s2 = Session::new("s2", "a@b.com", SaveMode::Local);
        assert!(!s2.incognito());
        let s3 = Session::new("s3", "a@b.com", SaveMode::Server);
        assert!(!s3.incognito());
    }

    #[test]
    fn new_session_history_is_empty() {
        let s = Session::new("s1", "a@b.com", SaveMode::Local);
        assert!(s.history.is_empty());
    }

    #[test]
    fn files_manifest_none_when_no_files() {
        let s = Session::new("s1", "a@b.com", SaveMode::Local);
        assert!(s.files_manifest_message().is_none());
    }

    #[test]
    fn files_manifest_lists_attached_filenames_sorted() {
        let mut s = Session::new("s1", "a@b.com", SaveMode::Local);
        s.add_file("b.txt", "desc");
        s.add_file("a.txt", "desc");
        let manifest = s.files_manifest_message().unwrap();
        assert!(manifest.find("a.txt").unwrap() < manifest.find("b.txt").unwrap());
    }

    #[test]
    fn touch_updates_last_activity() {
        let mut s = Session::new("s1", "a@b.com", SaveMode::Local);
        let before = s.last_activity;
        std::thread::sleep(std::time::Duration::from_millis(5));
        s.touch();
        assert!(s.last_activity >= before);
    }
}
