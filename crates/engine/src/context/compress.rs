//! Incremental context compression.
//!
//! Overflowing conversation messages are folded, together with the previous
//! summary, into one `[Context Summary]` system message by a summarizer model.

use chatforge_core::completion::Completer;
use chatforge_core::error::ChatError;
use chatforge_core::message::{Message, Role};
use chatforge_core::request::SamplingParams;
use tracing::{debug, info};

use super::truncation::{SUMMARY_PREFIX, is_summary};

const SUMMARY_TEMPERATURE: f32 = 0.3;
const SUMMARY_MAX_TOKENS: u32 = 1500;

const FIRST_SUMMARY_PROMPT: &str = "You are a conversation summarization assistant. \
Compress the following conversation history into a concise summary that keeps the key \
information, important decisions and context.

Requirements:
- Keep the user's needs, preferences and important facts
- Keep key technical details and decisions
- Drop small talk and repetition
- Aim for 20-30% of the original length

Output the summary only, without any extra explanation.";

const MERGE_SUMMARY_PROMPT: &str = "You are a conversation summarization assistant. \
Merge the previous conversation summary and the new conversation content into one new \
summary that keeps the key information, important decisions and context.

Requirements:
- Build on the previous summary and integrate the new content
- Keep the user's needs, preferences and important facts
- Keep key technical details and decisions
- Drop small talk and repetition
- The new summary must be shorter than the previous summary plus the new content (about 20-30%)
- Merge information that repeats or overlaps the previous summary

Output the new summary only, without any extra explanation.";

/// Which model summarizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryModel {
    pub provider: String,
    pub model: String,
}

/// Summary text with the tag removed.
fn summary_body(message: &Message) -> &str {
    message
        .content
        .strip_prefix(SUMMARY_PREFIX)
        .unwrap_or(&message.content)
        .trim()
}

fn transcript(messages: &[&Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let speaker = if m.role == Role::User { "User" } else { "Assistant" };
            format!("{speaker}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn compression_input(previous: Option<&str>, overflow: &[&Message]) -> (String, &'static str) {
    let text = transcript(overflow);
    match previous {
        Some(prev) => (
            format!("Previous conversation summary:\n{prev}\n\n\nNew conversation content:\n{text}"),
            MERGE_SUMMARY_PROMPT,
        ),
        None => (text, FIRST_SUMMARY_PROMPT),
    }
}

/// Compress everything older than the newest `max_messages` conversation
/// messages.
///
/// Returns the non-summary system messages, a fresh summary, then the recent
/// messages. A transcript that already fits is returned unchanged. Any
/// failure (including an empty summary) is returned so the caller can fall
/// back to truncation.
pub async fn compress(
    completer: &dyn Completer,
    summarizer: &SummaryModel,
    messages: &[Message],
    max_messages: usize,
) -> Result<Vec<Message>, ChatError> {
    let conversation: Vec<&Message> = messages
        .iter()
        .filter(|m| m.role.is_conversational())
        .collect();
    if conversation.len() <= max_messages {
        debug!(count = conversation.len(), max_messages, "No compression needed");
        return Ok(messages.to_vec());
    }

    let split = conversation.len() - max_messages;
    let (overflow, recent) = conversation.split_at(split);
    let previous = messages.iter().rev().find(|m| is_summary(m)).map(summary_body);

    let (input, system_prompt) = compression_input(previous, overflow);
    let request = vec![Message::system(system_prompt), Message::user(input)];
    let sampling = SamplingParams {
        temperature: Some(SUMMARY_TEMPERATURE),
        max_tokens: Some(SUMMARY_MAX_TOKENS),
        ..Default::default()
    };

    let summary = completer
        .complete(&summarizer.provider, &summarizer.model, request, sampling)
        .await?;
    let summary = summary.trim();
    if summary.is_empty() {
        return Err(ChatError::internal("summarizer returned an empty summary"));
    }

    info!(
        compressed = overflow.len(),
        kept = recent.len(),
        incremental = previous.is_some(),
        "Context compressed"
    );

    let system = messages
        .iter()
        .filter(|m| m.role == Role::System && !is_summary(m))
        .cloned();
    Ok(system
        .chain(std::iter::once(Message::system(format!("{SUMMARY_PREFIX} {summary}"))))
        .chain(recent.iter().map(|m| (*m).clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        reply: String,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    #[async_trait]
    impl Completer for Recording {
        async fn complete(
            &self,
            _provider: &str,
            _model: &str,
            messages: Vec<Message>,
            sampling: SamplingParams,
        ) -> Result<String, ChatError> {
            assert_eq!(sampling.max_tokens, Some(1500));
            self.seen.lock().unwrap().push(messages);
            Ok(self.reply.clone())
        }
    }

    fn summarizer() -> SummaryModel {
        SummaryModel {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
        }
    }

    fn transcript_of(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("u{i}"))
                } else {
                    Message::assistant(format!("a{i}"))
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn short_transcripts_pass_through() {
        let completer = Recording::default();
        let messages = transcript_of(3);
        let out = compress(&completer, &summarizer(), &messages, 5).await.unwrap();
        assert_eq!(out.len(), 3);
        assert!(completer.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn overflow_becomes_a_single_summary() {
        let completer = Recording {
            reply: "  user likes rust  ".into(),
            ..Default::default()
        };
        let mut messages = vec![Message::system("sys")];
        messages.extend(transcript_of(6));

        let out = compress(&completer, &summarizer(), &messages, 2).await.unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].content, "sys");
        assert_eq!(out[1].content, "[Context Summary] user likes rust");
        assert_eq!(out[2].content, "u4");
        assert_eq!(out[3].content, "a5");

        let seen = completer.seen.lock().unwrap();
        let input = &seen[0][1].content;
        assert!(input.starts_with("User: u0\n\nAssistant: a1"));
        assert!(!input.contains("u4"));
    }

    #[tokio::test]
    async fn previous_summary_is_merged_not_recompressed() {
        let completer = Recording {
            reply: "merged".into(),
            ..Default::default()
        };
        let mut messages = vec![Message::system(format!("{SUMMARY_PREFIX} old facts"))];
        messages.extend(transcript_of(4));

        let out = compress(&completer, &summarizer(), &messages, 2).await.unwrap();
        assert_eq!(out.iter().filter(|m| is_summary(m)).count(), 1);
        assert_eq!(out[0].content, "[Context Summary] merged");

        let seen = completer.seen.lock().unwrap();
        let input = &seen[0][1].content;
        assert!(input.starts_with("Previous conversation summary:\nold facts\n\n\nNew conversation content:\n"));
        assert!(!input.contains(SUMMARY_PREFIX));
    }

    #[tokio::test]
    async fn empty_summary_is_an_error() {
        let completer = Recording {
            reply: "   ".into(),
            ..Default::default()
        };
        let messages = transcript_of(6);
        assert!(compress(&completer, &summarizer(), &messages, 2).await.is_err());
    }
}
