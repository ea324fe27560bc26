// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session Store (C1): holds active sessions keyed by id, providing atomic
//! per-session checkout/checkin. Grounded on the teacher's dependency on
//! `dashmap` for its connection registry, applied here to sessions instead
//! of sockets — per-session exclusive acquisition is the inner
//! `tokio::sync::Mutex`; the map itself only ever needs the lock-free
//! concurrent access `DashMap` already provides.
use std::sync::Arc;

use atlas_config::SaveMode;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::session::Session;

/// Holds active sessions keyed by session id.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the session under its per-session lock, creating it lazily
    /// with the given default save-mode if this is the first request for
    /// this id (§3 Session lifecycle). Subsequent requests for the same id
    /// wait on the returned guard's drop.
    pub async fn acquire(&self, session_id: &str, owner_email: &str, default_save_mode: SaveMode) -> OwnedMutexGuard<Session> {
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, "creating session lazily");
                Arc::new(Mutex::new(Session::new(session_id, owner_email, default_save_mode)))
            })
            .clone();
        entry.lock_owned().await
    }

    /// Explicit reset: drop the session entirely. A subsequent `acquire`
    /// recreates it from scratch (§3 Session lifecycle: "destroyed when
    /// explicitly reset").
    pub fn reset(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Evict sessions whose lock is uncontended (`try_lock` succeeds) and
    /// whose last activity predates `idle_for`. Eviction never runs while a
    /// session is held (§4.9): a held session's `try_lock` fails and it is
    /// skipped this pass.
    pub fn evict_idle(&self, idle_for: chrono::Duration) -> usize {
        let cutoff = chrono::Utc::now() - idle_for;
        let mut to_remove = Vec::new();
        for entry in self.sessions.iter() {
            if let Ok(guard) = entry.value().clone().try_lock_owned() {
                if guard.last_activity < cutoff {
                    to_remove.push(entry.key().clone());
                }
            }
        }
        for key in &to_remove {
            self.sessions.remove(key);
        }
        to_remove.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_creates_session_lazily_on_first_request() {
        let store = SessionStore::new();
        let guard = store.acquire("s1", "a@b.com", SaveMode::Local).await;
        assert_eq!(guard.id, "s1");
        assert_eq!(guard.owner_email, "a@b.com");
    }

    #[tokio::test]
    async fn acquire_returns_the_same_session_on_repeat_calls() {
        let store = SessionStore::new();
        {
            let mut guard = store.acquire("s1", "a@b.com", SaveMode::Local).await;
            guard.add_file("a.txt", "desc");
        }
        let guard = store.acquire("s1", "a@b.com", SaveMode::Local).await;
        assert!(guard.files.contains_key("a.txt"));
    }

    #[tokio::test]
    async fn concurrent_acquire_serializes_on_the_same_session() {
        let store = Arc::new(SessionStore::new());
        let store2 = store.clone();
        let first = store.acquire("s1", "a@b.com", SaveMode::Local).await;
        let second_task = tokio::spawn(async move {
            let _second = store2.acquire("s1", "a@b.com", SaveMode::Local).await;
            std::time::Instant::now()
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let release_time = std::time::Instant::now();
        drop(first);
        let acquire_time = second_task.await.unwrap();
        assert!(acquire_time >= release_time);
    }

    #[tokio::test]
    async fn reset_drops_the_session_so_next_acquire_recreates_it() {
        let store = SessionStore::new();
        {
            let mut guard = store.acquire("s1", "a@b.com", SaveMode::Local).await;
            guard.add_file("a.txt", "desc");
        }
        store.reset("s1");
        let guard = store.acquire("s1", "a@b.com", SaveMode::Local).await;
        assert!(!guard.files.contains_key("a.txt"));
    }

    #[tokio::test]
    async fn evict_idle_skips_sessions_currently_held() {
        let store = SessionStore::new();
        let guard = store.acquire("s1", "a@b.com", SaveMode::Local).await;
        let removed = store.evict_idle(chrono::Duration::zero());
        assert_eq!(removed, 0);
        drop(guard);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn evict_idle_removes_uncontended_stale_sessions() {
        let store = SessionStore::new();
        {
            let _guard = store.acquire("s1", "a@b.com", SaveMode::Local).await;
        }
        let removed = store.evict_idle(chrono::Duration::zero());
        assert_eq!(removed, 1);
        assert!(store.is_empty());
    }
}
