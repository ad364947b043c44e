//! The unified request model handed to protocol adapters.
//!
//! Built fresh for every turn (and every tool-continuation inside a turn);
//! never persisted.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// How a model exposes control over reasoning intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningMode {
    /// A discrete on/adaptive switch (e.g. `thinking.type`)
    Adaptive,
    /// An enumerated effort level (e.g. `reasoning.effort`)
    Effort,
    /// A numeric token budget (e.g. `thinking.budget_tokens`)
    Budget,
}

/// The requested intensity: a named level or a token budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReasoningEffort {
    Budget(u64),
    Level(String),
}

/// Reasoning request. Deserializes from either a bare bool or an object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ReasoningInput")]
pub struct ReasoningRequest {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    /// Preferred control mode; falls back to the model's first declared mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ReasoningMode>,
}

impl ReasoningRequest {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReasoningInput {
    Flag(bool),
    Settings {
        enabled: bool,
        #[serde(default)]
        effort: Option<ReasoningEffort>,
        #[serde(default)]
        mode: Option<ReasoningMode>,
    },
}

impl From<ReasoningInput> for ReasoningRequest {
    fn from(input: ReasoningInput) -> Self {
        match input {
            ReasoningInput::Flag(enabled) => Self {
                enabled,
                effort: None,
                mode: None,
            },
            ReasoningInput::Settings {
                enabled,
                effort,
                mode,
            } => Self {
                enabled,
                effort,
                mode,
            },
        }
    }
}

/// Provider-neutral sampling parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, alias = "stopSequences", skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// A tool declared to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolDeclaration {
    /// Executed by us when the model calls it.
    Function {
        name: String,
        description: String,
        parameters: serde_json::Value,
    },
    /// Executed server-side by the provider; `spec` is sent verbatim.
    Builtin {
        name: String,
        spec: serde_json::Value,
    },
}

impl ToolDeclaration {
    pub fn name(&self) -> &str {
        match self {
            ToolDeclaration::Function { name, .. } | ToolDeclaration::Builtin { name, .. } => name,
        }
    }
}

/// One upstream call's worth of request state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedChatRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub provider: String,
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
    #[serde(default)]
    pub reasoning: ReasoningRequest,
    #[serde(default)]
    pub sampling: SamplingParams,
    /// Provider passthrough parameters, merged into the wire body last
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_from_bool() {
        let r: ReasoningRequest = serde_json::from_str("true").unwrap();
        assert!(r.enabled);
        assert!(r.effort.is_none());
    }

    #[test]
    fn reasoning_from_object_with_budget() {
        let r: ReasoningRequest =
            serde_json::from_str(r#"{"enabled":true,"effort":2048,"mode":"budget"}"#).unwrap();
        assert_eq!(r.effort, Some(ReasoningEffort::Budget(2048)));
        assert_eq!(r.mode, Some(ReasoningMode::Budget));
    }

    #[test]
    fn reasoning_from_object_with_level() {
        let r: ReasoningRequest =
            serde_json::from_str(r#"{"enabled":true,"effort":"high"}"#).unwrap();
        assert_eq!(r.effort, Some(ReasoningEffort::Level("high".into())));
    }

    #[test]
    fn sampling_accepts_stop_sequences_alias() {
        let s: SamplingParams =
            serde_json::from_str(r#"{"temperature":0.2,"stopSequences":["END"]}"#).unwrap();
        assert_eq!(s.stop, vec!["END".to_string()]);
        assert_eq!(s.temperature, Some(0.2));
    }
}
