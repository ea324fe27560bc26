// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Save Coordinator (C12): honours the save-mode contract (none / local /
//! server). The `Persistence` collaborator trait is the storage boundary;
//! only a scriptable in-memory mock is implemented here — the real
//! datastore is out of scope.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use atlas_config::SaveMode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::events::{Event, Publisher};
use crate::message::Message;

/// A persisted snapshot of one conversation (attached files pruned to
/// references per §4.9's server-mode contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub conversation_id: String,
    pub owner_email: String,
    pub messages: Vec<Message>,
}

/// A lightweight listing entry for `Persistence::list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub message_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// The persistence collaborator (§6).
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save(&self, conversation: ConversationSnapshot) -> Result<String, PersistenceError>;
    async fn load(&self, conversation_id: &str, user_email: &str) -> Result<Option<ConversationSnapshot>, PersistenceError>;
    async fn list(&self, user_email: &str) -> Result<Vec<ConversationSummary>, PersistenceError>;
    async fn delete(&self, conversation_id: &str, user_email: &str) -> Result<bool, PersistenceError>;
    async fn export_all(&self, user_email: &str) -> Result<Vec<ConversationSnapshot>, PersistenceError>;
}

/// Deterministic, network-free persistence collaborator for tests.
#[derive(Default)]
pub struct InMemoryPersistence {
    conversations: Mutex<HashMap<String, ConversationSnapshot>>,
    next_id: Mutex<u64>,
    fail_save: Mutex<bool>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `save` call (and only that one) fail, to exercise the
    /// "persistence failure is logged, request still succeeds" path (§7).
    pub fn fail_next_save(&self) {
        *self.fail_save.lock().unwrap() = true;
    }

    pub fn saved_count(&self) -> usize {
        self.conversations.lock().unwrap().len()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn save(&self, conversation: ConversationSnapshot) -> Result<String, PersistenceError> {
        if std::mem::take(&mut *self.fail_save.lock().unwrap()) {
            return Err(PersistenceError::Storage("simulated failure".into()));
        }
        let mut next_id = self.next_id.lock().unwrap();
        let id = format!("conv-{}", *next_id);
        *next_id += 1;
        let mut snapshot = conversation;
        snapshot.conversation_id = id.clone();
        self.conversations.lock().unwrap().insert(id.clone(), snapshot);
        Ok(id)
    }

    async fn load(&self, conversation_id: &str, user_email: &str) -> Result<Option<ConversationSnapshot>, PersistenceError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .filter(|c| c.owner_email == user_email)
            .cloned())
    }

    async fn list(&self, user_email: &str) -> Result<Vec<ConversationSummary>, PersistenceError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.owner_email == user_email)
            .map(|c| ConversationSummary { conversation_id: c.conversation_id.clone(), message_count: c.messages.len() })
            .collect())
    }

    async fn delete(&self, conversation_id: &str, user_email: &str) -> Result<bool, PersistenceError> {
        let mut conversations = self.conversations.lock().unwrap();
        if conversations.get(conversation_id).map(|c| c.owner_email == user_email).unwrap_or(false) {
            conversations.remove(conversation_id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn export_all(&self, user_email: &str) -> Result<Vec<ConversationSnapshot>, PersistenceError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.owner_email == user_email)
            .cloned()
            .collect())
    }
}

/// Honours the three save-mode behaviors of §4.9 exactly.
pub struct SaveCoordinator {
    persistence: std::sync::Arc<dyn Persistence>,
}

impl SaveCoordinator {
    pub fn new(persistence: std::sync::Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Run the save-mode contract for one finished request and publish
    /// `conversation_saved` as appropriate. Never raises: a persistence
    /// failure is logged and the request still succeeds (§7).
    pub async fn finish(&self, save_mode: SaveMode, owner_email: &str, messages: &[Message], publisher: &Publisher) {
        match save_mode {
            SaveMode::None => {}
            SaveMode::Local => {
                publisher.publish(Event::ConversationSaved { conversation_id: String::new() }).await;
            }
            SaveMode::Server => {
                let snapshot = ConversationSnapshot {
                    conversation_id: String::new(),
                    owner_email: owner_email.to_string(),
                    messages: messages.to_vec(),
                };
                match self.persistence.save(snapshot).await {
                    Ok(id) => {
                        publisher.publish(Event::ConversationSaved { conversation_id: id }).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "persistence save failed; continuing without conversation_saved");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message as CoreMessage;
    use std::sync::Arc;

    #[tokio::test]
    async fn none_mode_never_calls_persistence_or_emits_event() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let coordinator = SaveCoordinator::new(persistence.clone());
        let (publisher, mut rx) = Publisher::new(4);
        coordinator.finish(SaveMode::None, "a@b.com", &[CoreMessage::user("hi")], &publisher).await;
        drop(publisher);
        assert!(rx.recv().await.is_none());
        assert_eq!(persistence.saved_count(), 0);
    }

    #[tokio::test]
    async fn local_mode_emits_empty_id_without_calling_persistence() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let coordinator = SaveCoordinator::new(persistence.clone());
        let (publisher, mut rx) = Publisher::new(4);
        coordinator.finish(SaveMode::Local, "a@b.com", &[CoreMessage::user("hi")], &publisher).await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::ConversationSaved { conversation_id } if conversation_id.is_empty()));
        assert_eq!(persistence.saved_count(), 0);
    }

    #[tokio::test]
    async fn server_mode_persists_exactly_once_and_emits_returned_id() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let coordinator = SaveCoordinator::new(persistence.clone());
        let (publisher, mut rx) = Publisher::new(4);
        coordinator.finish(SaveMode::Server, "a@b.com", &[CoreMessage::user("hi")], &publisher).await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::ConversationSaved { conversation_id } if !conversation_id.is_empty()));
        assert_eq!(persistence.saved_count(), 1);
    }

    #[tokio::test]
    async fn server_mode_save_failure_is_logged_without_emitting_event() {
        let persistence = Arc::new(InMemoryPersistence::new());
        persistence.fail_next_save();
        let coordinator = SaveCoordinator::new(persistence.clone());
        let (publisher, mut rx) = Publisher::new(4);
        coordinator.finish(SaveMode::Server, "a@b.com", &[CoreMessage::user("hi")], &publisher).await;
        drop(publisher);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn load_enforces_owner_email_scoping() {
        let persistence = InMemoryPersistence::new();
        let id = persistence
            .save(ConversationSnapshot { conversation_id: String::new(), owner_email: "a@b.com".into(), messages: vec![] })
            .await
            .unwrap();
        assert!(persistence.load(&id, "other@b.com").await.unwrap().is_none());
        assert!(persistence.load(&id, "a@b.com").await.unwrap().is_some());
    }
}
