//! Importance-weighted truncation of the conversation window.
//!
//! The newest `min(max, ceil(0.7 × max))` conversation messages are always
//! kept verbatim. Remaining slots go to older messages ranked by:
//!
//! | factor | weight |
//! |---|---|
//! | position recency | 30 |
//! | length (full at 500 chars) | 20 |
//! | part of a user/assistant adjacency | 25 |
//! | importance keywords (full at 5 hits) | 25 |

use chatforge_core::message::{Message, Role};

/// Tag marking a system message as a compression summary.
pub const SUMMARY_PREFIX: &str = "[Context Summary]";

const RECENT_SHARE: f64 = 0.7;
const LENGTH_FULL_CHARS: f64 = 500.0;
const KEYWORD_FULL_HITS: f64 = 5.0;

const IMPORTANT_KEYWORDS: &[&str] = &[
    "问题", "错误", "bug", "issue", "error", "exception",
    "需要", "要求", "需求", "requirement", "need", "want",
    "偏好", "喜欢", "prefer", "preference", "like",
    "重要", "必须", "一定要", "important", "must", "required",
    "配置", "设置", "config", "setting", "configure",
    "决定", "选择", "decision", "choose", "select",
];

pub fn is_summary(message: &Message) -> bool {
    message.role == Role::System && message.content.starts_with(SUMMARY_PREFIX)
}

/// How many of the newest messages are always kept.
pub fn recent_count(max_messages: usize) -> usize {
    let share = (max_messages as f64 * RECENT_SHARE).ceil() as usize;
    max_messages.min(share)
}

/// Keyword score in [0, 1].
pub fn keyword_importance(content: &str) -> f64 {
    if content.is_empty() {
        return 0.0;
    }
    let lower = content.to_lowercase();
    let hits = IMPORTANT_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .count();
    (hits as f64 / KEYWORD_FULL_HITS).min(1.0)
}

fn is_pair(a: Role, b: Role) -> bool {
    matches!(
        (a, b),
        (Role::User, Role::Assistant) | (Role::Assistant, Role::User)
    )
}

/// Whether `messages[index]` sits next to its counterpart. The first message
/// is checked against the next one, every other against the previous one.
fn is_paired(messages: &[&Message], index: usize) -> bool {
    let role = messages[index].role;
    if index == 0 {
        return messages.get(1).is_some_and(|next| is_pair(role, next.role));
    }
    is_pair(role, messages[index - 1].role)
}

/// Content length in UTF-16 code units: astral-plane characters (emoji)
/// count twice.
fn content_length(content: &str) -> f64 {
    content.encode_utf16().count() as f64
}

fn score(messages: &[&Message], index: usize) -> f64 {
    let total = messages.len() as f64;
    let position = (total - index as f64) / total;
    let length = (content_length(&messages[index].content) / LENGTH_FULL_CHARS).min(1.0);
    let paired = if is_paired(messages, index) { 1.0 } else { 0.0 };
    let keywords = keyword_importance(&messages[index].content);

    position * 30.0 + length * 20.0 + paired * 25.0 + keywords * 25.0
}

/// Pick at most `max_messages` conversation messages, preserving order.
fn select_important<'a>(conversation: Vec<&'a Message>, max_messages: usize) -> Vec<&'a Message> {
    if conversation.len() <= max_messages {
        return conversation;
    }

    let recent = recent_count(max_messages);
    let split = conversation.len() - recent;
    let (older, newest) = conversation.split_at(split);
    let slots = max_messages - recent;
    if slots == 0 {
        return newest.to_vec();
    }

    let mut scored: Vec<(usize, f64)> = (0..older.len()).map(|i| (i, score(older, i))).collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut keep: Vec<usize> = scored.into_iter().take(slots).map(|(i, _)| i).collect();
    keep.sort_unstable();

    keep.into_iter()
        .map(|i| older[i])
        .chain(newest.iter().copied())
        .collect()
}

/// System messages (minus old summaries) followed by the selected
/// conversation messages. Other roles are dropped.
pub fn truncate(messages: &[Message], max_messages: usize) -> Vec<Message> {
    let system = messages
        .iter()
        .filter(|m| m.role == Role::System && !is_summary(m));
    let conversation: Vec<&Message> = messages
        .iter()
        .filter(|m| m.role.is_conversational())
        .collect();

    system
        .chain(select_important(conversation, max_messages))
        .cloned()
        .collect()
}
