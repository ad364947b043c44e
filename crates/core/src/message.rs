//! Message and message-tree domain types.
//!
//! A session's messages form a tree through `parent_id`. The tree is kept as
//! an arena keyed by id plus a `children_index`, so walking a branch is a
//! series of map lookups rather than pointer chasing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use crate::error::StorageError;
use crate::tool::ToolCall;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Client-side data payloads, never sent upstream
    Data,
    /// Tool execution result fed back to the model during a turn
    Tool,
}

impl Role {
    /// User and assistant messages are the "conversation" proper.
    pub fn is_conversational(self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }
}

/// Lifecycle of a persisted message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Pending,
    Streaming,
    Completed,
    Error,
}

/// A file attached to a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(alias = "type")]
    pub mime_type: String,
    pub size: u64,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A single message in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default = "new_id")]
    pub id: String,

    pub role: Role,

    #[serde(default)]
    pub content: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Raw web-search results persisted alongside the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_results: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,

    #[serde(default)]
    pub status: MessageStatus,

    /// Weak reference to the parent message in the session tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Tool calls requested by the assistant (turn-local)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// For tool results, the call this answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// For tool results, the tool name (some wire formats key results by name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            attachments: Vec::new(),
            reasoning_content: None,
            search_results: None,
            model: None,
            provider: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            status: MessageStatus::Completed,
            parent_id: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// A tool result answering `call`.
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(call.id.clone());
        msg.name = Some(call.name.clone());
        msg
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Arena of messages keyed by id with a derived children index.
#[derive(Debug, Clone, Default)]
pub struct MessageTree {
    messages: HashMap<String, Message>,
    children_index: HashMap<String, Vec<String>>,
    roots: Vec<String>,
    /// Insertion order, used to break timestamp ties deterministically
    order: Vec<String>,
}

impl MessageTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tree (and its children index) from a flat message list.
    ///
    /// Duplicate ids are skipped with a warning.
    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut tree = Self::new();
        for msg in messages {
            if let Err(e) = tree.insert(msg) {
                warn!(error = %e, "Skipping message while rebuilding tree");
            }
        }
        tree.reindex();
        tree
    }

    /// Insert a message. A parent that is not (yet) in the arena makes the
    /// message a root until the next [`reindex`](Self::reindex).
    pub fn insert(&mut self, message: Message) -> Result<(), StorageError> {
        if self.messages.contains_key(&message.id) {
            return Err(StorageError::Conflict(format!(
                "message {} already exists",
                message.id
            )));
        }
        let id = message.id.clone();
        match message.parent_id.as_deref() {
            Some(parent) if self.messages.contains_key(parent) => {
                self.children_index
                    .entry(parent.to_string())
                    .or_default()
                    .push(id.clone());
            }
            _ => self.roots.push(id.clone()),
        }
        self.order.push(id.clone());
        self.messages.insert(id, message);
        Ok(())
    }

    /// Insert `message` as a child of `parent_id` (a root when `None`),
    /// overriding whatever parent the message carried.
    pub fn append_child(
        &mut self,
        parent_id: Option<&str>,
        mut message: Message,
    ) -> Result<&Message, StorageError> {
        if let Some(parent) = parent_id
            && !self.messages.contains_key(parent)
        {
            return Err(StorageError::NotFound(format!("parent message {parent}")));
        }
        message.parent_id = parent_id.map(String::from);
        let id = message.id.clone();
        self.insert(message)?;
        self.messages
            .get(&id)
            .ok_or_else(|| StorageError::Backend(format!("message {id} vanished after insert")))
    }

    /// Recompute `children_index` and `roots` from the parent pointers.
    pub fn reindex(&mut self) {
        self.children_index.clear();
        self.roots.clear();
        for id in &self.order {
            let Some(msg) = self.messages.get(id) else {
                continue;
            };
            match msg.parent_id.as_deref() {
                Some(parent) if self.messages.contains_key(parent) => {
                    self.children_index
                        .entry(parent.to_string())
                        .or_default()
                        .push(id.clone());
                }
                _ => self.roots.push(id.clone()),
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.get_mut(id)
    }

    pub fn children(&self, id: &str) -> &[String] {
        self.children_index
            .get(id)
            .map(|c| c.as_slice())
            .unwrap_or_default()
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Messages from the root down to `leaf_id` (inclusive).
    ///
    /// An unknown leaf yields an empty branch. Parent cycles are cut at the
    /// first repeated id.
    pub fn branch(&self, leaf_id: &str) -> Vec<&Message> {
        let mut branch = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut current = Some(leaf_id);
        while let Some(id) = current {
            if !seen.insert(id) {
                break;
            }
            let Some(msg) = self.messages.get(id) else {
                break;
            };
            branch.push(msg);
            current = msg.parent_id.as_deref();
        }
        branch.reverse();
        branch
    }

    /// The newest message that has no children.
    pub fn latest_leaf(&self) -> Option<&str> {
        let mut best: Option<&Message> = None;
        for id in &self.order {
            if !self.children(id).is_empty() {
                continue;
            }
            let Some(msg) = self.messages.get(id) else {
                continue;
            };
            if best.is_none_or(|b| msg.created_at >= b.created_at) {
                best = Some(msg);
            }
        }
        best.map(|m| m.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.order.iter().filter_map(|id| self.messages.get(id))
    }
}
