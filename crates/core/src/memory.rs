//! Memory and document-retrieval collaborator traits.
//!
//! Both stores are append-only from the pipeline's point of view: turns read
//! from them, post-processing appends to the memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// A single remembered fact about a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Relevance score (set by search operations)
    #[serde(default)]
    pub score: f32,
}

/// Long-term user memory.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Memories relevant to `query`, best first, at most `limit`.
    async fn relevant(
        &self,
        user_id: &str,
        project_id: Option<&str>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StorageError>;

    /// Every memory in scope, oldest first (used for de-duplication).
    async fn list(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<MemoryRecord>, StorageError>;

    /// Append new memories; returns how many were stored.
    async fn append(
        &self,
        user_id: &str,
        project_id: Option<&str>,
        contents: Vec<String>,
    ) -> Result<usize, StorageError>;
}

/// A document chunk returned by nearest-neighbour search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalChunk {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub token_count: u32,
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub similarity: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
}

/// Project-scoped document retrieval.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Top-`top_k` chunks for `query`, by descending similarity, above the
    /// store's similarity threshold.
    async fn search(
        &self,
        query: &str,
        project_id: &str,
        user_id: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalChunk>, StorageError>;
}
