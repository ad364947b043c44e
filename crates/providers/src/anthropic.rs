//! Anthropic Messages API adapter.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE with `content_block_*` and `message_*` events
//! - Extended thinking deltas surfaced as reasoning

use async_trait::async_trait;
use chatforge_core::{
    ChatError, Message, Role, StreamUsage, ToolDeclaration, UnifiedChatRequest,
    UnifiedStreamEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::adapter::{
    ModelInfo, ProtocolAdapter, ProviderSettings, StreamState, WireRequest, extract_system,
    finalize_body,
};
use crate::errors::normalize_error;
use crate::registry::ProviderKind;
use crate::sse::SseFrame;
use crate::transport::Transport;
use crate::usage::normalize_usage;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Default, Clone, Copy)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Convert messages to content-block format.
    ///
    /// Consecutive tool results are folded into one user turn, since the
    /// Messages API requires strict user/assistant alternation.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User | Role::Data => {
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Text(msg.content.clone()),
                    });
                }
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Text(msg.content.clone()),
                        });
                    } else {
                        let mut blocks: Vec<ContentBlock> = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(ContentBlock::Text {
                                text: msg.content.clone(),
                            });
                        }
                        for tc in &msg.tool_calls {
                            let input = serde_json::from_str::<Value>(&tc.arguments)
                                .ok()
                                .filter(Value::is_object)
                                .unwrap_or_else(|| serde_json::json!({}));
                            blocks.push(ContentBlock::ToolUse {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                input,
                            });
                        }
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Blocks(blocks),
                        });
                    }
                }
                Role::Tool => {
                    let block = ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    };
                    match result.last_mut() {
                        Some(AnthropicMessage {
                            role,
                            content: AnthropicContent::Blocks(blocks),
                        }) if *role == "user" => blocks.push(block),
                        _ => result.push(AnthropicMessage {
                            role: "user".into(),
                            content: AnthropicContent::Blocks(vec![block]),
                        }),
                    }
                }
                Role::System => {} // handled separately
            }
        }

        result
    }

    fn to_api_tools(tools: &[ToolDeclaration]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| match t {
                ToolDeclaration::Function {
                    name,
                    description,
                    parameters,
                } => serde_json::json!({
                    "name": name,
                    "description": description,
                    "input_schema": parameters,
                }),
                ToolDeclaration::Builtin { spec, .. } => spec.clone(),
            })
            .collect()
    }

    fn headers(settings: &ProviderSettings) -> Vec<(String, String)> {
        vec![
            ("x-api-key".into(), settings.api_key().to_string()),
            ("anthropic-version".into(), ANTHROPIC_VERSION.into()),
        ]
    }
}

#[async_trait]
impl ProtocolAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn default_check_model(&self) -> &'static str {
        "claude-3-5-haiku-latest"
    }

    fn build_request(
        &self,
        request: &UnifiedChatRequest,
        settings: &ProviderSettings,
    ) -> Result<WireRequest, ChatError> {
        let (system, messages) = extract_system(&request.messages);
        let sampling = &request.sampling;

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": sampling.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });

        if let Some(sys) = system {
            body["system"] = Value::String(sys);
        }
        if let Some(t) = sampling.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(p) = sampling.top_p {
            body["top_p"] = serde_json::json!(p);
        }
        if let Some(k) = sampling.top_k {
            body["top_k"] = serde_json::json!(k);
        }
        if !sampling.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(sampling.stop);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(Self::to_api_tools(&request.tools));
        }

        finalize_body(&mut body, request, settings)?;

        debug!(provider = %settings.id, model = %request.model, "Built messages request");

        let mut headers = Self::headers(settings);
        headers.push(("Content-Type".into(), "application/json".into()));

        Ok(WireRequest {
            url: format!("{}/v1/messages", settings.base_url),
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
        let event: Value = match serde_json::from_str(&frame.data) {
            Ok(v) => v,
            Err(e) => {
                trace!(provider = %provider, error = %e, data = %frame.data, "Ignoring unparseable Anthropic SSE");
                return Vec::new();
            }
        };

        let event_type = event["type"]
            .as_str()
            .or(frame.event.as_deref())
            .unwrap_or("");

        let index = event["index"].as_u64().unwrap_or(0) as u32;

        match event_type {
            "message_start" => {
                // Input side of the usage; output arrives with message_delta
                match event.pointer("/message/usage").and_then(normalize_usage) {
                    Some(u) => {
                        let mut usage = StreamUsage::new(u.prompt_tokens, 0, u.prompt_tokens);
                        usage.cached_tokens = u.cached_tokens;
                        vec![UnifiedStreamEvent::Usage { usage }]
                    }
                    None => Vec::new(),
                }
            }
            "content_block_start" => {
                let block = &event["content_block"];
                match block["type"].as_str() {
                    Some("tool_use") => {
                        state.begin_tool_call(index, block["id"].as_str(), block["name"].as_str());
                        Vec::new()
                    }
                    Some("text") => block["text"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                        .map(|t| vec![UnifiedStreamEvent::content(t)])
                        .unwrap_or_default(),
                    _ => Vec::new(),
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => delta["text"]
                        .as_str()
                        .map(|t| vec![UnifiedStreamEvent::content(t)])
                        .unwrap_or_default(),
                    "thinking_delta" => delta["thinking"]
                        .as_str()
                        .map(|t| vec![UnifiedStreamEvent::reasoning(t)])
                        .unwrap_or_default(),
                    "input_json_delta" => {
                        if let Some(partial) = delta["partial_json"].as_str()
                            && state.has_tool_call(index)
                        {
                            state.push_arguments(index, partial);
                        }
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
            "message_delta" => {
                if let Some(reason) = event.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    state.set_finish_reason(reason);
                }
                match event.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                    Some(out) => vec![UnifiedStreamEvent::Usage {
                        usage: StreamUsage::new(0, out, out),
                    }],
                    None => Vec::new(),
                }
            }
            "message_stop" => state.finish(),
            "error" => state.fail(normalize_error(provider, None, &event)),
            // ping, content_block_stop
            _ => Vec::new(),
        }
    }

    async fn list_models(
        &self,
        settings: &ProviderSettings,
        transport: &dyn Transport,
    ) -> Result<Vec<ModelInfo>, ChatError> {
        let url = format!("{}/v1/models", settings.base_url);
        let body = transport
            .get_json(&settings.id, &url, &Self::headers(settings))
            .await?;

        Ok(body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        Some(ModelInfo {
                            id: m["id"].as_str()?.to_string(),
                            name: m["display_name"].as_str().map(String::from),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

// --- Messages API wire types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}
