//! Per-turn intermediate results.

use serde::{Deserialize, Serialize};

use crate::memory::RetrievalChunk;
use crate::message::Message;
use crate::search::WebSearchResult;

/// Output of the gathering phase. Produced once per turn and consumed once
/// by the context assembler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorResult {
    /// `None` for temporary chats, which are never persisted
    pub session_id: Option<String>,
    /// Input messages with attachment text materialized into their content
    pub processed_messages: Vec<Message>,
    pub relevant_memories: Vec<String>,
    pub web_search_result: Option<WebSearchResult>,
    pub retrieved_chunks: Option<Vec<RetrievalChunk>>,
}

impl OrchestratorResult {
    pub fn retrieved(&self) -> &[RetrievalChunk] {
        self.retrieved_chunks.as_deref().unwrap_or_default()
    }
}

/// Best-effort output of post-processing. Absence is not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostProcessingResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_memories: Option<Vec<String>>,
}
