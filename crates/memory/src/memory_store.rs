//! In-memory long-term user memory with keyword relevance.

use async_trait::async_trait;
use chatforge_core::error::StorageError;
use chatforge_core::memory::{MemoryRecord, MemoryStore};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "was", "with", "what", "how",
    "this", "that", "have", "from", "they", "will", "would", "there", "their", "about", "which",
    "when", "your", "does", "into",
];

/// Lower-cased words of at least three characters, minus stopwords.
pub(crate) fn keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

fn in_scope(record: &MemoryRecord, user_id: &str, project_id: Option<&str>) -> bool {
    // Global memories (no project) are visible from every project
    record.user_id == user_id
        && (record.project_id.is_none() || record.project_id.as_deref() == project_id)
}

/// Memories held in a `Vec`, scored by keyword overlap with the query.
#[derive(Clone, Default)]
pub struct InMemoryMemoryStore {
    records: Arc<RwLock<Vec<MemoryRecord>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn relevant(
        &self,
        user_id: &str,
        project_id: Option<&str>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StorageError> {
        let query_keywords = keywords(query);
        if query_keywords.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.records.read().await;
        let mut results: Vec<MemoryRecord> = records
            .iter()
            .filter(|r| in_scope(r, user_id, project_id))
            .filter_map(|r| {
                let content = r.content.to_lowercase();
                let hits = query_keywords
                    .iter()
                    .filter(|k| content.contains(k.as_str()))
                    .count();
                if hits == 0 {
                    return None;
                }
                let mut record = r.clone();
                record.score = hits as f32 / query_keywords.len() as f32;
                Some(record)
            })
            .collect();

        // Best first; newer wins ties
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn list(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<MemoryRecord>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| in_scope(r, user_id, project_id))
            .cloned()
            .collect())
    }

    async fn append(
        &self,
        user_id: &str,
        project_id: Option<&str>,
        contents: Vec<String>,
    ) -> Result<usize, StorageError> {
        let mut records = self.records.write().await;
        let mut stored = 0;
        for content in contents {
            let content = content.trim();
            if content.is_empty() {
                continue;
            }
            records.push(MemoryRecord {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                project_id: project_id.map(String::from),
                content: content.to_string(),
                created_at: Utc::now(),
                score: 0.0,
            });
            stored += 1;
        }
        debug!(user_id, stored, "Memories appended");
        Ok(stored)
    }
}
