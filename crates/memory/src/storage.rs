//! In-memory session storage: useful for tests, temporary deployments and
//! the CLI.

use async_trait::async_trait;
use chatforge_core::error::StorageError;
use chatforge_core::message::{Message, MessageTree};
use chatforge_core::storage::{Session, Storage};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Provisional titles are the first few characters of the opening message.
const PROVISIONAL_TITLE_CHARS: usize = 50;

struct SessionEntry {
    session: Session,
    tree: MessageTree,
}

/// Sessions and their message trees behind a single lock.
///
/// Holding one write lock across "read leaf, insert child, move leaf" is what
/// keeps concurrent appends from forking the active branch.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn provisional_title(first_message: &str) -> Option<String> {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(PROVISIONAL_TITLE_CHARS).collect())
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn ensure_session(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        first_message: &str,
        project_id: Option<&str>,
    ) -> Result<Session, StorageError> {
        let mut sessions = self.sessions.write().await;

        if let Some(id) = session_id
            && let Some(entry) = sessions.get(id)
        {
            // Another user's session is indistinguishable from a missing one
            if entry.session.user_id != user_id {
                return Err(StorageError::NotFound(format!("session {id}")));
            }
            return Ok(entry.session.clone());
        }

        let id = session_id
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = Session {
            id: id.clone(),
            user_id: user_id.to_string(),
            project_id: project_id.map(String::from),
            title: provisional_title(first_message),
            current_leaf_id: None,
            created_at: Utc::now(),
        };
        debug!(session_id = %id, user_id, "Session created");
        sessions.insert(
            id,
            SessionEntry {
                session: session.clone(),
                tree: MessageTree::new(),
            },
        );
        Ok(session)
    }

    async fn session(&self, session_id: &str) -> Result<Option<Session>, StorageError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|e| e.session.clone()))
    }

    async fn update_session_title(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| StorageError::NotFound(format!("session {session_id}")))?;
        entry.session.title = Some(title.to_string());
        Ok(())
    }

    async fn append_message(
        &self,
        session_id: &str,
        message: Message,
    ) -> Result<Message, StorageError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| StorageError::NotFound(format!("session {session_id}")))?;

        let parent = message
            .parent_id
            .clone()
            .or_else(|| entry.session.current_leaf_id.clone());
        let stored = entry.tree.append_child(parent.as_deref(), message)?.clone();
        entry.session.current_leaf_id = Some(stored.id.clone());
        Ok(stored)
    }

    async fn update_message(
        &self,
        session_id: &str,
        message: &Message,
    ) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| StorageError::NotFound(format!("session {session_id}")))?;
        let existing = entry
            .tree
            .get_mut(&message.id)
            .ok_or_else(|| StorageError::NotFound(format!("message {}", message.id)))?;

        // The tree shape is owned by append_message
        let parent_id = existing.parent_id.take();
        *existing = message.clone();
        existing.parent_id = parent_id;
        Ok(())
    }

    async fn load_tree(&self, session_id: &str) -> Result<MessageTree, StorageError> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| StorageError::NotFound(format!("session {session_id}")))?;
        Ok(MessageTree::from_messages(entry.tree.iter().cloned()))
    }
}
