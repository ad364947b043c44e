//! Storage collaborators for chatforge.
//!
//! Everything here is in-memory: sessions and their message trees, long-term
//! user memories, and project document chunks searched by cosine similarity.
//! The prompt helpers turn what these stores return into the blocks the
//! context assembler injects.

pub mod dedup;
pub mod files;
pub mod memory_store;
pub mod prompt;
pub mod storage;
pub mod vector;

pub use dedup::{is_duplicate, text_similarity};
pub use files::{LocalFileExtractor, is_text_attachment};
pub use memory_store::InMemoryMemoryStore;
pub use prompt::{estimate_tokens, format_memories, format_retrieved, select_within_budget};
pub use storage::InMemoryStorage;
pub use vector::{DocumentInput, HashingEmbedder, InMemoryVectorStore, cosine_similarity};
