//! The inbound turn request and its validation.

use chatforge_core::error::ChatError;
use chatforge_core::message::{Message, Role};
use chatforge_core::request::{ReasoningRequest, SamplingParams};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where web search runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSourceKind {
    /// The provider searches server-side through a builtin tool
    Builtin,
    /// We search before the turn and offer a `web_search` function
    External,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSearchSource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Passed through to builtin search as `web_search_options`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
}

impl WebSearchSource {
    pub fn source_kind(&self) -> Option<SearchSourceKind> {
        match self.kind.as_str() {
            "builtin" => Some(SearchSourceKind::Builtin),
            "external" => Some(SearchSourceKind::External),
            _ => None,
        }
    }
}

/// Per-request generation overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningRequest>,
    /// Search backend for providers that take one (`search_std` by default)
    #[serde(default, rename = "search_engine", skip_serializing_if = "Option::is_none")]
    pub search_engine: Option<String>,
    #[serde(flatten)]
    pub sampling: SamplingParams,
    /// Provider passthrough (`verbosity`, `search_mode`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub web_search: bool,
    #[serde(default)]
    pub web_search_source: Option<WebSearchSource>,
    #[serde(default)]
    pub vector_search: bool,
    #[serde(default)]
    pub reasoning: Option<ReasoningRequest>,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    #[serde(default)]
    pub tool_options: Map<String, Value>,
    #[serde(default)]
    pub advanced_settings: Option<AdvancedSettings>,
    #[serde(default)]
    pub temp_chat: bool,
}

impl ChatRequest {
    /// Deserialize and validate a JSON body.
    pub fn parse(body: Value) -> Result<Self, ChatError> {
        let request: ChatRequest = serde_json::from_value(body)
            .map_err(|e| ChatError::invalid_request(format!("Invalid request data: {e}")))?;
        request.validate()?;
        Ok(request)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.messages.is_empty() {
            return Err(ChatError::invalid_request("messages must contain at least one message"));
        }
        if let Some(m) = self.messages.iter().find(|m| m.role == Role::Tool) {
            return Err(ChatError::invalid_request(format!(
                "message {} has role 'tool', which clients may not send",
                m.id
            )));
        }
        if let Some(source) = &self.web_search_source
            && source.source_kind().is_none()
        {
            return Err(ChatError::invalid_request(format!(
                "webSearchSource.type must be 'builtin' or 'external', got '{}'",
                source.kind
            )));
        }
        Ok(())
    }

    /// Reasoning from advanced settings wins over the top-level flag.
    pub fn effective_reasoning(&self) -> ReasoningRequest {
        self.advanced_settings
            .as_ref()
            .and_then(|a| a.reasoning.clone())
            .or_else(|| self.reasoning.clone())
            .unwrap_or_default()
    }

    pub fn sampling(&self) -> SamplingParams {
        self.advanced_settings
            .as_ref()
            .map(|a| a.sampling.clone())
            .unwrap_or_default()
    }

    pub fn search_source(&self) -> Option<SearchSourceKind> {
        self.web_search_source.as_ref().and_then(WebSearchSource::source_kind)
    }

    /// External search is only used when search is on and explicitly routed
    /// outside the provider.
    pub fn uses_external_search(&self) -> bool {
        self.web_search && self.search_source() == Some(SearchSourceKind::External)
    }

    /// Text of the newest user message.
    pub fn last_user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatforge_core::ErrorKind;
    use chatforge_core::request::ReasoningEffort;
    use serde_json::json;

    #[test]
    fn minimal_request_parses() {
        let req = ChatRequest::parse(json!({
            "messages": [{"role": "user", "content": "What's 2+2?"}]
        }))
        .unwrap();
        assert_eq!(req.messages.len(), 1);
        assert!(!req.effective_reasoning().enabled);
        assert!(!req.uses_external_search());
        assert_eq!(req.last_user_text(), "What's 2+2?");
    }

    #[test]
    fn full_request_parses() {
        let req = ChatRequest::parse(json!({
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "news?", "attachments": [
                    {"id": "a", "name": "n.txt", "url": "/uploads/n.txt", "type": "text/plain", "size": 3}
                ]}
            ],
            "sessionId": "s1",
            "projectId": "p1",
            "provider": "openai",
            "model": "gpt-4o",
            "webSearch": true,
            "webSearchSource": {"type": "external", "provider": "tavily"},
            "reasoning": {"enabled": true, "effort": "high"},
            "enabledTools": ["code_execution"],
            "advancedSettings": {"temperature": 0.2, "stopSequences": ["END"], "verbosity": "low"},
            "tempChat": false
        }))
        .unwrap();
        assert!(req.uses_external_search());
        assert_eq!(req.messages[1].attachments[0].mime_type, "text/plain");
        let reasoning = req.effective_reasoning();
        assert_eq!(reasoning.effort, Some(ReasoningEffort::Level("high".into())));
        let sampling = req.sampling();
        assert_eq!(sampling.temperature, Some(0.2));
        assert_eq!(sampling.stop, vec!["END".to_string()]);
        let advanced = req.advanced_settings.unwrap();
        assert_eq!(advanced.extra["verbosity"], "low");
    }

    #[test]
    fn advanced_reasoning_overrides_flag() {
        let req = ChatRequest::parse(json!({
            "messages": [{"role": "user", "content": "x"}],
            "reasoning": false,
            "advancedSettings": {"reasoning": {"enabled": true, "effort": 4096}}
        }))
        .unwrap();
        let r = req.effective_reasoning();
        assert!(r.enabled);
        assert_eq!(r.effort, Some(ReasoningEffort::Budget(4096)));
    }

    #[test]
    fn rejections_are_invalid_request() {
        let cases = [
            json!({"messages": []}),
            json!({"messages": [{"role": "robot", "content": "x"}]}),
            json!({"messages": [{"role": "tool", "content": "x"}]}),
            json!({"messages": [{"role": "user", "content": "x"}], "reasoning": "yes"}),
            json!({"messages": [{"role": "user", "content": "x"}], "webSearchSource": {"type": "psychic"}}),
            json!({"sessionId": "s1"}),
        ];
        for body in cases {
            let err = ChatRequest::parse(body.clone()).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidRequest, "{body}");
        }
    }
}
