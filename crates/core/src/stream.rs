//! The unified stream contract between protocol adapters and the turn
//! controller, plus usage accounting.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

use crate::error::ChatError;
use crate::tool::ToolCall;

/// Token accounting for one upstream call (or a sum of several).
///
/// Merging is plain field-wise addition, so it is associative and
/// commutative. Optional detail fields stay `None` only while every merged
/// part left them out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

fn add_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

impl StreamUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            cached_tokens: None,
            reasoning_tokens: None,
        }
    }

    pub fn merge(&self, other: &StreamUsage) -> StreamUsage {
        StreamUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
            cached_tokens: add_opt(self.cached_tokens, other.cached_tokens),
            reasoning_tokens: add_opt(self.reasoning_tokens, other.reasoning_tokens),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == StreamUsage::default()
    }
}

impl Add for StreamUsage {
    type Output = StreamUsage;

    fn add(self, rhs: StreamUsage) -> StreamUsage {
        self.merge(&rhs)
    }
}

impl AddAssign for StreamUsage {
    fn add_assign(&mut self, rhs: StreamUsage) {
        *self = self.merge(&rhs);
    }
}

impl std::iter::Sum for StreamUsage {
    fn sum<I: Iterator<Item = StreamUsage>>(iter: I) -> Self {
        iter.fold(StreamUsage::default(), |acc, u| acc + u)
    }
}

/// One unified event parsed from a provider's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedStreamEvent {
    ContentDelta { delta: String },
    ReasoningDelta { delta: String },
    /// A fully assembled tool call
    ToolCall { call: ToolCall },
    /// A partial usage report; summed by the consumer
    Usage { usage: StreamUsage },
    Error { error: ChatError },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
}

impl UnifiedStreamEvent {
    pub fn content(delta: impl Into<String>) -> Self {
        UnifiedStreamEvent::ContentDelta {
            delta: delta.into(),
        }
    }

    pub fn reasoning(delta: impl Into<String>) -> Self {
        UnifiedStreamEvent::ReasoningDelta {
            delta: delta.into(),
        }
    }

    pub fn done(finish_reason: Option<String>) -> Self {
        UnifiedStreamEvent::Done { finish_reason }
    }

    /// Event type string (matches the serde tag).
    pub fn event_type(&self) -> &'static str {
        match self {
            UnifiedStreamEvent::ContentDelta { .. } => "content_delta",
            UnifiedStreamEvent::ReasoningDelta { .. } => "reasoning_delta",
            UnifiedStreamEvent::ToolCall { .. } => "tool_call",
            UnifiedStreamEvent::Usage { .. } => "usage",
            UnifiedStreamEvent::Error { .. } => "error",
            UnifiedStreamEvent::Done { .. } => "done",
        }
    }

    /// `done` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnifiedStreamEvent::Done { .. } | UnifiedStreamEvent::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(p: u64, c: u64, cached: Option<u64>, reasoning: Option<u64>) -> StreamUsage {
        StreamUsage {
            prompt_tokens: p,
            completion_tokens: c,
            total_tokens: p + c,
            cached_tokens: cached,
            reasoning_tokens: reasoning,
        }
    }

    #[test]
    fn merge_is_associative_and_commutative() {
        let a = u(5, 1, None, None);
        let b = u(0, 7, Some(2), None);
        let c = u(3, 0, None, Some(4));

        assert_eq!((a + b) + c, a + (b + c));
        assert_eq!(a + b, b + a);
        assert_eq!(a + b + c, c + a + b);
    }

    #[test]
    fn chunking_does_not_change_totals() {
        let deltas = vec![
            u(10, 0, Some(4), None),
            u(0, 3, None, Some(1)),
            u(0, 2, None, Some(1)),
            u(0, 5, None, None),
        ];
        let flat: StreamUsage = deltas.iter().copied().sum();

        let left: StreamUsage = deltas[..2].iter().copied().sum();
        let right: StreamUsage = deltas[2..].iter().copied().sum();
        let mut regrouped = right;
        regrouped += left;

        assert_eq!(flat, regrouped);
        assert_eq!(flat.completion_tokens, 10);
        assert_eq!(flat.cached_tokens, Some(4));
        assert_eq!(flat.reasoning_tokens, Some(2));
    }

    #[test]
    fn detail_fields_stay_absent_when_never_reported() {
        let total = u(1, 1, None, None) + u(2, 2, None, None);
        assert!(total.cached_tokens.is_none());
        assert!(total.reasoning_tokens.is_none());
    }

    #[test]
    fn event_tags() {
        let ev = UnifiedStreamEvent::content("hi");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "content_delta");
        assert_eq!(ev.event_type(), "content_delta");
        assert!(UnifiedStreamEvent::done(None).is_terminal());
        assert!(!ev.is_terminal());
    }
}
