//! Task orchestrator: gathers per-turn context concurrently.
//!
//! Five independent sub-tasks are joined behind one barrier:
//!
//! | sub-task | runs when | on failure |
//! |---|---|---|
//! | session ensure | not a temporary chat | turn aborts |
//! | attachment text | always | placeholder line |
//! | memory retrieval | memory enabled, not temporary | empty |
//! | web search | external source selected | absent |
//! | vector retrieval | project scope and vector search | absent |

use std::sync::Arc;

use chatforge_config::AppConfig;
use chatforge_core::error::ChatError;
use chatforge_core::memory::{MemoryStore, RetrievalChunk, VectorStore};
use chatforge_core::message::{Attachment, Message};
use chatforge_core::search::{WebSearch, WebSearchResult};
use chatforge_core::storage::{FileExtractor, Storage};
use chatforge_core::turn::OrchestratorResult;
use chatforge_memory::select_within_budget;
use futures::future::join_all;
use tracing::{debug, error, info};

/// What the caller asked for this turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatherFlags {
    /// Never persisted: no session, no memories
    pub temp_chat: bool,
    /// Search through the external collaborator before the turn
    pub external_search: bool,
    pub vector_search: bool,
}

#[derive(Debug, Clone)]
pub struct GatherRequest<'a> {
    pub user_id: &'a str,
    pub session_id: Option<&'a str>,
    pub project_id: Option<&'a str>,
    pub messages: Vec<Message>,
    pub flags: GatherFlags,
}

#[derive(Debug, Clone)]
struct GatherLimits {
    memory_enabled: bool,
    memory_max_tokens: usize,
    memory_candidates: usize,
    retrieval_top_k: usize,
    attachment_max_chars: usize,
}

pub struct TaskOrchestrator {
    storage: Arc<dyn Storage>,
    files: Arc<dyn FileExtractor>,
    memory: Option<Arc<dyn MemoryStore>>,
    vectors: Option<Arc<dyn VectorStore>>,
    search: Option<Arc<dyn WebSearch>>,
    limits: GatherLimits,
}

impl TaskOrchestrator {
    pub fn new(storage: Arc<dyn Storage>, files: Arc<dyn FileExtractor>, config: &AppConfig) -> Self {
        Self {
            storage,
            files,
            memory: None,
            vectors: None,
            search: None,
            limits: GatherLimits {
                memory_enabled: config.memory.enabled,
                memory_max_tokens: config.memory.max_context_tokens,
                memory_candidates: config.memory.candidate_limit,
                retrieval_top_k: config.retrieval.top_k,
                attachment_max_chars: config.turn.attachment_max_chars,
            },
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_vectors(mut self, vectors: Arc<dyn VectorStore>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.search = Some(search);
        self
    }

    /// Run every sub-task and wait for all of them. Only a session failure
    /// is returned; everything else degrades to an empty result.
    pub async fn gather(&self, request: GatherRequest<'_>) -> Result<OrchestratorResult, ChatError> {
        let query = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .ok_or_else(|| ChatError::invalid_request("messages must not be empty"))?;

        let (session, processed_messages, relevant_memories, web_search_result, retrieved_chunks) = tokio::join!(
            self.ensure_session(&request, &query),
            self.materialize_attachments(&request.messages),
            self.relevant_memories(&request, &query),
            self.web_search(&request, &query),
            self.retrieve(&request, &query),
        );

        let session_id = session?;
        info!(
            session_id = session_id.as_deref().unwrap_or("temporary"),
            memories = relevant_memories.len(),
            searched = web_search_result.is_some(),
            chunks = retrieved_chunks.as_ref().map_or(0, Vec::len),
            "Turn context gathered"
        );

        Ok(OrchestratorResult {
            session_id,
            processed_messages,
            relevant_memories,
            web_search_result,
            retrieved_chunks,
        })
    }

    async fn ensure_session(
        &self,
        request: &GatherRequest<'_>,
        first_message: &str,
    ) -> Result<Option<String>, ChatError> {
        if request.flags.temp_chat {
            return Ok(None);
        }
        let session = self
            .storage
            .ensure_session(
                request.user_id,
                request.session_id,
                first_message,
                request.project_id,
            )
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to ensure session");
                ChatError::from(e)
            })?;
        Ok(Some(session.id))
    }

    async fn materialize_attachments(&self, messages: &[Message]) -> Vec<Message> {
        join_all(messages.iter().map(|m| self.materialize(m))).await
    }

    /// Prepend the text of every attachment to the message content.
    async fn materialize(&self, message: &Message) -> Message {
        let mut message = message.clone();
        if message.attachments.is_empty() {
            return message;
        }
        let details = join_all(message.attachments.iter().map(|a| self.attachment_text(a))).await;
        message.content = format!("{}\n\n{}", details.join("\n\n"), message.content);
        message
    }

    async fn attachment_text(&self, attachment: &Attachment) -> String {
        match self
            .files
            .extract_text(attachment, self.limits.attachment_max_chars)
            .await
        {
            Ok(text) => format!("[File: {}]\nContent:\n{text}", attachment.name),
            Err(e) => {
                debug!(file = %attachment.name, error = %e, "Attachment not readable as text");
                format!("[File Attachment: {}, URL: {}]", attachment.name, attachment.url)
            }
        }
    }

    async fn relevant_memories(&self, request: &GatherRequest<'_>, query: &str) -> Vec<String> {
        if request.flags.temp_chat || !self.limits.memory_enabled {
            return Vec::new();
        }
        let Some(memory) = &self.memory else {
            return Vec::new();
        };

        match memory
            .relevant(
                request.user_id,
                request.project_id,
                query,
                self.limits.memory_candidates,
            )
            .await
        {
            Ok(records) => select_within_budget(
                records.iter().map(|r| r.content.as_str()),
                self.limits.memory_max_tokens,
                self.limits.memory_candidates,
            ),
            Err(e) => {
                error!(error = %e, "Failed to fetch memories");
                Vec::new()
            }
        }
    }

    async fn web_search(&self, request: &GatherRequest<'_>, query: &str) -> Option<WebSearchResult> {
        if !request.flags.external_search {
            return None;
        }
        let search = self.search.as_ref()?;
        match search.search(query).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Web search failed");
                None
            }
        }
    }

    async fn retrieve(&self, request: &GatherRequest<'_>, query: &str) -> Option<Vec<RetrievalChunk>> {
        if !request.flags.vector_search {
            return None;
        }
        let project_id = request.project_id?;
        let vectors = self.vectors.as_ref()?;
        match vectors
            .search(query, project_id, request.user_id, self.limits.retrieval_top_k)
            .await
        {
            Ok(chunks) => Some(chunks),
            Err(e) => {
                error!(error = %e, "Vector retrieval failed");
                None
            }
        }
    }
}
