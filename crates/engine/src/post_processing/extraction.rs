//! Long-term memory extraction from a finished exchange.
//!
//! The model is shown the latest exchange plus what is already stored and
//! answers with `{"memories": [...]}` (a bare array is accepted too).
//! Anything that repeats a stored memory is filtered out again here, since
//! models do not reliably honour the instruction.

use chatforge_core::completion::Completer;
use chatforge_core::error::ChatError;
use chatforge_core::message::{Message, Role};
use chatforge_core::request::SamplingParams;
use chatforge_memory::is_duplicate;
use serde_json::Value;
use tracing::{debug, info, warn};

const EXTRACTION_PROMPT: &str = r#"You are a memory extraction assistant. Your task is to identify NEW and IMPORTANT facts about the user from this conversation snippet.

RULES:
1. Extract ONLY new information not already in existing memories
2. Focus on: User preferences, personal details (name, occupation, interests), project info, specific instructions
3. Ignore: Casual chat, temporary context, questions that don't reveal preferences
4. DO NOT extract: Passwords, API keys, phone numbers, addresses, or sensitive PII
5. Each memory should be a concise, standalone fact (one sentence)
6. If nothing new or important is found, return empty array

OUTPUT FORMAT: Valid JSON object with "memories" array of strings
Example: {"memories": ["User prefers dark mode", "User is building a chat app"]}
If nothing to extract: {"memories": []}"#;

/// The last exchange rendered as `User:` / `Assistant:` lines.
pub fn recent_context(messages: &[Message]) -> Option<String> {
    let conversation: Vec<&Message> = messages
        .iter()
        .filter(|m| m.role.is_conversational())
        .collect();

    match conversation.as_slice() {
        [] => None,
        [only] => Some(format!("User: {}", only.content)),
        [.., a, b] => Some(
            [a, b]
                .iter()
                .map(|m| {
                    let who = if m.role == Role::User { "User" } else { "Assistant" };
                    format!("{who}: {}", m.content)
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        ),
    }
}

fn system_prompt(existing: &[String]) -> String {
    if existing.is_empty() {
        return EXTRACTION_PROMPT.to_string();
    }
    let listed: Vec<String> = existing.iter().map(|m| format!("- {m}")).collect();
    format!(
        "{EXTRACTION_PROMPT}\n\n<ExistingMemories>\nThe following memories have already been saved. DO NOT extract these again:\n{}\n</ExistingMemories>",
        listed.join("\n")
    )
}

/// Parse the model's reply. Code fences are tolerated; anything that is not
/// the expected JSON yields an empty list.
pub fn parse_memories(reply: &str) -> Vec<String> {
    let cleaned = reply.replace("```json", "").replace("```", "");
    let parsed: Value = match serde_json::from_str(cleaned.trim()) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Memory extraction reply is not JSON");
            return Vec::new();
        }
    };

    let items = match &parsed {
        Value::Object(map) => map.get("memories").and_then(Value::as_array),
        Value::Array(items) => Some(items),
        _ => None,
    };
    items
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Run one extraction and return only the memories not already stored.
pub async fn extract_memories(
    completer: &dyn Completer,
    provider: &str,
    model: &str,
    messages: &[Message],
    existing: &[String],
) -> Result<Vec<String>, ChatError> {
    let Some(context) = recent_context(messages) else {
        return Ok(Vec::new());
    };

    let prompt = vec![
        Message::system(system_prompt(existing)),
        Message::user(format!(
            "Extract NEW memories from this conversation (ignore anything already saved):\n\n{context}\n\nRemember: Output a JSON object with \"memories\" array. Only include genuinely new information."
        )),
    ];
    let sampling = SamplingParams {
        temperature: Some(0.1),
        max_tokens: Some(500),
        ..Default::default()
    };

    let reply = completer.complete(provider, model, prompt, sampling).await?;
    if reply.trim().is_empty() {
        warn!(provider, model, "Memory extraction returned empty content");
        return Ok(Vec::new());
    }

    let mut fresh: Vec<String> = Vec::new();
    for candidate in parse_memories(&reply) {
        let seen = existing.iter().chain(fresh.iter()).map(String::as_str);
        if is_duplicate(&candidate, seen) {
            debug!(memory = %candidate, "Dropping duplicate memory");
            continue;
        }
        fresh.push(candidate);
    }
    if !fresh.is_empty() {
        info!(count = fresh.len(), "Extracted new memories");
    }
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        reply: String,
        system: Mutex<String>,
    }

    #[async_trait]
    impl Completer for Canned {
        async fn complete(
            &self,
            _: &str,
            _: &str,
            messages: Vec<Message>,
            _: SamplingParams,
        ) -> Result<String, ChatError> {
            *self.system.lock().unwrap() = messages[0].content.clone();
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn context_uses_last_two_conversational_messages() {
        let messages = vec![
            Message::system("sys"),
            Message::user("first"),
            Message::assistant("one"),
            Message::user("I work as a nurse"),
            Message::assistant("Noted"),
        ];
        assert_eq!(
            recent_context(&messages).unwrap(),
            "User: I work as a nurse\n\nAssistant: Noted"
        );
        assert_eq!(
            recent_context(&[Message::user("solo")]).unwrap(),
            "User: solo"
        );
        assert!(recent_context(&[Message::system("x")]).is_none());
    }

    #[test]
    fn reply_formats() {
        assert_eq!(
            parse_memories("```json\n{\"memories\": [\"Likes tea\", \"  \"]}\n```"),
            vec!["Likes tea"]
        );
        assert_eq!(parse_memories("[\"A\", 3, \"B\"]"), vec!["A", "B"]);
        assert!(parse_memories("no json here").is_empty());
        assert!(parse_memories("{\"other\": []}").is_empty());
    }

    #[tokio::test]
    async fn existing_memories_are_listed_and_filtered() {
        let completer = Canned {
            reply: r#"{"memories": ["User is a nurse", "User lives in Lyon", "user lives in lyon"]}"#
                .into(),
            system: Mutex::new(String::new()),
        };
        let existing = vec!["User is a nurse".to_string()];
        let messages = vec![
            Message::user("I'm a nurse in Lyon"),
            Message::assistant("Nice!"),
        ];

        let fresh = extract_memories(&completer, "openai", "m", &messages, &existing)
            .await
            .unwrap();
        assert_eq!(fresh, vec!["User lives in Lyon"]);
        assert!(completer.system.lock().unwrap().contains("<ExistingMemories>\nThe following memories have already been saved. DO NOT extract these again:\n- User is a nurse\n</ExistingMemories>"));
    }
}
