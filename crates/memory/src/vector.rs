//! Vector similarity and project document retrieval.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity
//! - A feature-hashing embedder (bag of keywords folded into a fixed width)
//! - An in-memory chunk store searched by nearest neighbour

use async_trait::async_trait;
use chatforge_core::error::StorageError;
use chatforge_core::memory::{RetrievalChunk, VectorStore};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::memory_store::keywords;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Deterministic feature-hashing embedder.
///
/// Each keyword lands in one of `dimensions` buckets (FNV-1a). Good enough to
/// rank chunks by shared vocabulary without a model.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in keywords(text) {
            let bucket = (fnv1a(word.as_bytes()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

struct StoredChunk {
    project_id: String,
    user_id: String,
    embedding: Vec<f32>,
    chunk: RetrievalChunk,
}

/// A document to index, already split into chunks.
#[derive(Debug, Clone, Default)]
pub struct DocumentInput {
    pub file_id: String,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub chunks: Vec<String>,
}

/// Project-scoped chunk store with a similarity floor.
#[derive(Clone)]
pub struct InMemoryVectorStore {
    chunks: Arc<RwLock<Vec<StoredChunk>>>,
    embedder: HashingEmbedder,
    similarity_threshold: f32,
}

impl InMemoryVectorStore {
    pub fn new(similarity_threshold: f32) -> Self {
        Self {
            chunks: Arc::new(RwLock::new(Vec::new())),
            embedder: HashingEmbedder::default(),
            similarity_threshold,
        }
    }

    /// Index a document's chunks for `project_id`; returns how many were added.
    pub async fn add_document(
        &self,
        project_id: &str,
        user_id: &str,
        document: DocumentInput,
    ) -> usize {
        let mut chunks = self.chunks.write().await;
        let mut added = 0;
        for (index, content) in document.chunks.into_iter().enumerate() {
            if content.trim().is_empty() {
                continue;
            }
            let embedding = self.embedder.embed(&content);
            chunks.push(StoredChunk {
                project_id: project_id.to_string(),
                user_id: user_id.to_string(),
                embedding,
                chunk: RetrievalChunk {
                    id: Uuid::new_v4().to_string(),
                    token_count: crate::prompt::estimate_tokens(&content) as u32,
                    content,
                    file_id: document.file_id.clone(),
                    file_name: document.file_name.clone(),
                    file_type: document.file_type.clone(),
                    similarity: 0.0,
                    chunk_index: Some(index as u32),
                    page_number: None,
                    section_title: None,
                },
            });
            added += 1;
        }
        debug!(project_id, file_id = %document.file_id, added, "Document indexed");
        added
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new(0.3)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(
        &self,
        query: &str,
        project_id: &str,
        user_id: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalChunk>, StorageError> {
        let query_embedding = self.embedder.embed(query);
        let chunks = self.chunks.read().await;

        let mut scored: Vec<RetrievalChunk> = chunks
            .iter()
            .filter(|c| c.project_id == project_id && c.user_id == user_id)
            .filter_map(|c| {
                let similarity = cosine_similarity(&c.embedding, &query_embedding);
                if similarity < self.similarity_threshold {
                    return None;
                }
                let mut chunk = c.chunk.clone();
                chunk.similarity = similarity;
                Some(chunk)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_or_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(embedder.embed("borrow checker"), embedder.embed("Borrow CHECKER"));
        assert_eq!(embedder.embed("").iter().sum::<f32>(), 0.0);
    }

    async fn indexed() -> InMemoryVectorStore {
        let store = InMemoryVectorStore::new(0.3);
        store
            .add_document(
                "p1",
                "u1",
                DocumentInput {
                    file_id: "f1".into(),
                    file_name: Some("rust-book.md".into()),
                    file_type: Some("text/markdown".into()),
                    chunks: vec![
                        "The borrow checker enforces ownership rules".into(),
                        "Cargo manages dependencies and builds".into(),
                        "".into(),
                    ],
                },
            )
            .await;
        store
            .add_document(
                "p2",
                "u1",
                DocumentInput {
                    file_id: "f2".into(),
                    chunks: vec!["The borrow checker in another project".into()],
                    ..Default::default()
                },
            )
            .await;
        store
    }

    #[tokio::test]
    async fn search_ranks_and_scopes() {
        let store = indexed().await;
        let results = store
            .search("how does the borrow checker enforce ownership", "p1", "u1", 5)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_id, "f1");
        assert_eq!(results[0].chunk_index, Some(0));
        assert!(results[0].similarity >= 0.3);
    }

    #[tokio::test]
    async fn below_threshold_is_dropped() {
        let store = indexed().await;
        let results = store.search("pasta recipes", "p1", "u1", 5).await.unwrap();
        assert!(results.is_empty());
        let other_user = store.search("borrow checker", "p1", "u9", 5).await.unwrap();
        assert!(other_user.is_empty());
    }
}
