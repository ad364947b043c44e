//! The context assembler: turns gathered turn data into the final message
//! list sent upstream.
//!
//! Steps run in a fixed order:
//! 1. context limiting (compression, falling back to truncation)
//! 2. memory injection into the first system message
//! 3. retrieval block before the last message
//! 4. deep-thinking nudge for models without native reasoning
//! 5. external web-search context on the last message
//! 6. triggered skills appended to the system prompt
//!
//! Each step is a no-op when its input is empty.

use std::sync::Arc;

use chatforge_config::{ContextLimitConfig, ReasoningCapability, split_model_ref};
use chatforge_core::completion::Completer;
use chatforge_core::memory::RetrievalChunk;
use chatforge_core::message::{Message, Role};
use chatforge_core::search::WebSearchResult;
use chatforge_core::skill::Skill;
use chatforge_core::turn::OrchestratorResult;
use chatforge_memory::{format_memories, format_retrieved};
use tracing::{debug, error, info, warn};

use super::compress::{SummaryModel, compress};
use super::skills::{detect, skills_prompt};
use super::truncation::truncate;

pub const DEEP_THINKING_PROMPT: &str = "You are in 'Deep Thinking' mode. Please think carefully and provide a detailed, step-by-step analysis before giving your final answer.";

/// Model id fragments that mark a model as reasoning natively.
const NATIVE_REASONING_MARKERS: &[&str] = &["reasoner", "o1", "thinking"];

/// Whether `model` reasons on its own, so the nudge would be redundant.
pub fn is_native_reasoning(model: &str, capability: Option<&ReasoningCapability>) -> bool {
    capability.is_some() || NATIVE_REASONING_MARKERS.iter().any(|m| model.contains(m))
}

/// Per-turn assembly switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblyOptions<'a> {
    pub reasoning: bool,
    pub native_reasoning: bool,
    pub skills: &'a [Skill],
}

/// Final messages plus the raw search results persisted with the answer.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub messages: Vec<Message>,
    /// Empty unless external search ran
    pub search_results: String,
}

pub struct ContextAssembler {
    limit: ContextLimitConfig,
    completer: Option<Arc<dyn Completer>>,
}

impl ContextAssembler {
    pub fn new(limit: ContextLimitConfig) -> Self {
        Self {
            limit,
            completer: None,
        }
    }

    /// Completer used for compression; without one compression is skipped.
    pub fn with_completer(mut self, completer: Arc<dyn Completer>) -> Self {
        self.completer = Some(completer);
        self
    }

    pub async fn assemble(
        &self,
        gathered: OrchestratorResult,
        options: AssemblyOptions<'_>,
    ) -> AssembledContext {
        let OrchestratorResult {
            processed_messages,
            relevant_memories,
            web_search_result,
            retrieved_chunks,
            ..
        } = gathered;

        let mut messages = self.limit_context(processed_messages).await;
        inject_memories(&mut messages, &relevant_memories);
        inject_retrieval(&mut messages, retrieved_chunks.as_deref().unwrap_or_default());
        if options.reasoning && !options.native_reasoning {
            nudge_reasoning(&mut messages);
        }
        let search_results = inject_search(&mut messages, web_search_result.as_ref());
        inject_skills(&mut messages, options.skills);

        debug!(count = messages.len(), "Context assembled");
        AssembledContext {
            messages,
            search_results,
        }
    }

    async fn limit_context(&self, messages: Vec<Message>) -> Vec<Message> {
        if !self.limit.enabled {
            return messages;
        }
        let max = self.limit.max_messages;

        let summarizer = self
            .limit
            .compress_model
            .as_deref()
            .filter(|_| self.limit.compress)
            .and_then(split_model_ref)
            .map(|(provider, model)| SummaryModel {
                provider: provider.to_string(),
                model: model.to_string(),
            });

        match (summarizer, &self.completer) {
            (Some(summarizer), Some(completer)) => {
                match compress(completer.as_ref(), &summarizer, &messages, max).await {
                    Ok(compressed) => compressed,
                    Err(e) => {
                        error!(error = %e, "Context compression failed, using smart truncation");
                        truncate(&messages, max)
                    }
                }
            }
            (Some(_), None) => {
                warn!("Compression requested without a completer, truncating");
                truncate(&messages, max)
            }
            (None, _) => truncate(&messages, max),
        }
    }
}

// ── Injection steps ──────────────────────────────────────────────────────

/// Append `block` to the first system message, or open with a new one.
fn append_to_system(messages: &mut Vec<Message>, block: &str, separator: &str) {
    match messages.iter_mut().find(|m| m.role == Role::System) {
        Some(system) => {
            system.content.push_str(separator);
            system.content.push_str(block);
        }
        None => messages.insert(0, Message::system(block.trim())),
    }
}

pub fn inject_memories(messages: &mut Vec<Message>, memories: &[String]) {
    let block = format_memories(memories);
    if block.is_empty() {
        return;
    }
    append_to_system(messages, &block, "\n\n");
}

/// Retrieved chunks go in their own system message right before the last
/// message.
pub fn inject_retrieval(messages: &mut Vec<Message>, chunks: &[RetrievalChunk]) {
    let block = format_retrieved(chunks);
    if block.is_empty() {
        return;
    }
    let at = messages.len().saturating_sub(1);
    messages.insert(at, Message::system(block));
}

pub fn nudge_reasoning(messages: &mut Vec<Message>) {
    messages.insert(0, Message::system(DEEP_THINKING_PROMPT));
}

/// Prefix the last message with the search context. Returns the raw results.
pub fn inject_search(messages: &mut [Message], result: Option<&WebSearchResult>) -> String {
    let Some(result) = result else {
        return String::new();
    };
    if let Some(last) = messages.last_mut() {
        last.content = format!("{}\n\nUser Question: {}", result.search_prompt, last.content);
    }
    result.search_results.clone()
}

/// Detect skills against the last user message and append their prompt.
pub fn inject_skills(messages: &mut Vec<Message>, skills: &[Skill]) {
    if skills.is_empty() {
        return;
    }
    let Some(last_user) = messages.iter().rev().find(|m| m.role == Role::User) else {
        return;
    };
    let matches = detect(&last_user.content, skills);
    if matches.is_empty() {
        return;
    }

    let names: Vec<&str> = matches.iter().map(|m| m.skill.name.as_str()).collect();
    info!(skills = ?names, "Skills triggered");
    let prompt = skills_prompt(&matches);
    append_to_system(messages, &prompt, "");
}
