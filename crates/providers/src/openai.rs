//! OpenAI chat-completions adapter.
//!
//! Works with: OpenAI, DeepSeek, OpenRouter, Moonshot, xAI, Mistral,
//! SiliconFlow, Z.ai, Bailian, Volcengine, Ollama and any other endpoint
//! exposing `/chat/completions` with SSE streaming.
//!
//! Supports:
//! - Indexed tool-call argument deltas
//! - `reasoning_content` / `reasoning` deltas
//! - Usage via `stream_options.include_usage`

use async_trait::async_trait;
use chatforge_core::{
    ChatError, Message, Role, ToolDeclaration, UnifiedChatRequest, UnifiedStreamEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::adapter::{
    ModelInfo, ProtocolAdapter, ProviderSettings, StreamState, WireRequest, finalize_body,
};
use crate::errors::normalize_error;
use crate::registry::ProviderKind;
use crate::sse::SseFrame;
use crate::transport::Transport;
use crate::usage::normalize_usage;

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Convert our messages to chat-completions format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .filter(|m| m.role != Role::Data)
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User | Role::Data => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Function tools in the `{type, function}` envelope; builtins verbatim.
    fn to_api_tools(tools: &[ToolDeclaration]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| match t {
                ToolDeclaration::Function {
                    name,
                    description,
                    parameters,
                } => serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": description,
                        "parameters": parameters,
                    }
                }),
                ToolDeclaration::Builtin { spec, .. } => spec.clone(),
            })
            .collect()
    }

    fn auth_headers(settings: &ProviderSettings) -> Vec<(String, String)> {
        match settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => vec![("Authorization".into(), format!("Bearer {key}"))],
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl ProtocolAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn default_check_model(&self) -> &'static str {
        "gpt-4o-mini"
    }

    fn build_request(
        &self,
        request: &UnifiedChatRequest,
        settings: &ProviderSettings,
    ) -> Result<WireRequest, ChatError> {
        let sampling = &request.sampling;
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(t) = sampling.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(p) = sampling.top_p {
            body["top_p"] = serde_json::json!(p);
        }
        if let Some(max_tokens) = sampling.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(p) = sampling.presence_penalty {
            body["presence_penalty"] = serde_json::json!(p);
        }
        if let Some(p) = sampling.frequency_penalty {
            body["frequency_penalty"] = serde_json::json!(p);
        }
        if let Some(seed) = sampling.seed {
            body["seed"] = serde_json::json!(seed);
        }
        if !sampling.stop.is_empty() {
            body["stop"] = serde_json::json!(sampling.stop);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(Self::to_api_tools(&request.tools));
        }

        finalize_body(&mut body, request, settings)?;

        debug!(provider = %settings.id, model = %request.model, "Built chat-completions request");

        let mut headers = Self::auth_headers(settings);
        headers.push(("Content-Type".into(), "application/json".into()));

        Ok(WireRequest {
            url: format!("{}/chat/completions", settings.base_url),
            headers,
            body,
        })
    }

    fn parse_event(
        &self,
        provider: &str,
        frame: &SseFrame,
        state: &mut StreamState,
    ) -> Vec<UnifiedStreamEvent> {
        if frame.is_done_sentinel() {
            return state.finish();
        }

        let chunk: StreamResponse = match serde_json::from_str(&frame.data) {
            Ok(c) => c,
            Err(e) => {
                trace!(provider = %provider, data = %frame.data, error = %e, "Ignoring unparseable SSE chunk");
                return Vec::new();
            }
        };

        if let Some(error) = chunk.error {
            let body = serde_json::json!({ "error": error });
            return state.fail(normalize_error(provider, None, &body));
        }

        let mut events = Vec::new();

        if let Some(choice) = chunk.choices.first() {
            let delta = &choice.delta;

            let reasoning = delta
                .reasoning_content
                .as_deref()
                .or(delta.reasoning.as_deref());
            if let Some(r) = reasoning.filter(|r| !r.is_empty()) {
                events.push(UnifiedStreamEvent::reasoning(r));
            }

            if let Some(c) = delta.content.as_deref().filter(|c| !c.is_empty()) {
                events.push(UnifiedStreamEvent::content(c));
            }

            for tc in delta.tool_calls.iter().flatten() {
                let function = tc.function.as_ref();
                state.begin_tool_call(
                    tc.index,
                    tc.id.as_deref(),
                    function.and_then(|f| f.name.as_deref()),
                );
                if let Some(args) = function.and_then(|f| f.arguments.as_deref()) {
                    state.push_arguments(tc.index, args);
                }
            }

            if let Some(reason) = &choice.finish_reason {
                state.set_finish_reason(reason.clone());
            }
        }

        if let Some(usage) = chunk.usage.as_ref().and_then(normalize_usage) {
            events.push(UnifiedStreamEvent::Usage { usage });
        }

        events
    }

    async fn list_models(
        &self,
        settings: &ProviderSettings,
        transport: &dyn Transport,
    ) -> Result<Vec<ModelInfo>, ChatError> {
        let url = format!("{}/models", settings.base_url);
        let body = transport
            .get_json(&settings.id, &url, &Self::auth_headers(settings))
            .await?;

        let models = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str())
                    .map(|id| ModelInfo {
                        id: id.to_string(),
                        name: None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }
}

// --- Chat-completions wire types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
