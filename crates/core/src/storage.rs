//! Session storage and file-access collaborator traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::message::{Attachment, Message, MessageTree};

/// A chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Leaf of the active branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_leaf_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Session and message persistence.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Return the session `session_id`, or create one for `user_id` when the
    /// id is absent. `first_message` seeds the provisional title.
    async fn ensure_session(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        first_message: &str,
        project_id: Option<&str>,
    ) -> Result<Session, StorageError>;

    async fn session(&self, session_id: &str) -> Result<Option<Session>, StorageError>;

    async fn update_session_title(&self, session_id: &str, title: &str)
    -> Result<(), StorageError>;

    /// Append a message as a child of the current leaf (unless it already
    /// names a parent) and make it the new leaf. The parent is assigned under
    /// the store's own lock so concurrent appends never fork silently.
    async fn append_message(
        &self,
        session_id: &str,
        message: Message,
    ) -> Result<Message, StorageError>;

    /// Overwrite an existing message (content, status, usage).
    async fn update_message(&self, session_id: &str, message: &Message)
    -> Result<(), StorageError>;

    /// Load every message of the session as a tree.
    async fn load_tree(&self, session_id: &str) -> Result<MessageTree, StorageError>;
}

/// Text extraction for attachments.
#[async_trait]
pub trait FileExtractor: Send + Sync {
    /// Extract at most `max_chars` characters of text. Implementations note
    /// truncation inside the returned text.
    async fn extract_text(
        &self,
        attachment: &Attachment,
        max_chars: usize,
    ) -> Result<String, StorageError>;
}
