//! Google Gemini `streamGenerateContent` adapter.
//!
//! Gemini streams whole `GenerateContentResponse` objects over SSE
//! (`alt=sse`). Function calls arrive complete, usage metadata is cumulative
//! and there is no end sentinel: the stream simply closes.

use async_trait::async_trait;
use chatforge_core::{
    ChatError, Message, Role, ToolDeclaration, UnifiedChatRequest, UnifiedStreamEvent,
};
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::adapter::{
    ModelInfo, ProtocolAdapter, ProviderSettings, StreamState, WireRequest, extract_system,
    finalize_body,
};
use crate::errors::normalize_error;
use crate::registry::ProviderKind;
use crate::sse::SseFrame;
use crate::transport::Transport;
use crate::usage::normalize_usage;

pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Upper bound on model-list pages, in case a server keeps returning tokens.
const MAX_MODEL_PAGES: usize = 20;

#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiAdapter;

/// Only https URLs on Google API hosts are honoured; anything else falls back
/// to the public endpoint so the API key is never sent elsewhere.
pub fn safe_base_url(configured: &str) -> String {
    let Ok(url) = reqwest::Url::parse(configured) else {
        return GEMINI_DEFAULT_BASE_URL.to_string();
    };
    let host_ok = url.host_str().is_some_and(|host| {
        host == "generativelanguage.googleapis.com" || host.ends_with(".googleapis.com")
    });
    if url.scheme() == "https" && host_ok {
        configured.trim_end_matches('/').to_string()
    } else {
        warn!(base_url = %configured, "Ignoring non-Google Gemini base URL");
        GEMINI_DEFAULT_BASE_URL.to_string()
    }
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self
    }

    fn to_contents(messages: &[&Message]) -> Vec<Value> {
        let mut contents: Vec<Value> = Vec::new();

        for msg in messages {
            let (role, parts) = match msg.role {
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !msg.content.is_empty() {
                        parts.push(json!({ "text": msg.content }));
                    }
                    for tc in &msg.tool_calls {
                        let args = serde_json::from_str::<Value>(&tc.arguments)
                            .ok()
                            .filter(Value::is_object)
                            .unwrap_or_else(|| json!({}));
                        parts.push(json!({ "functionCall": { "name": tc.name, "args": args } }));
                    }
                    ("model", parts)
                }
                Role::Tool => {
                    let name = msg.name.clone().unwrap_or_default();
                    let part = json!({
                        "functionResponse": {
                            "name": name,
                            "response": { "result": msg.content },
                        }
                    });
                    ("user", vec![part])
                }
                _ => ("user", vec![json!({ "text": msg.content })]),
            };

            if parts.is_empty() {
                continue;
            }

            // Fold adjacent same-role entries (parallel function responses)
            match contents.last_mut() {
                Some(last)
                    if last["role"] == role
                        && msg.role == Role::Tool
                        && last["parts"][0].get("functionResponse").is_some() =>
                {
                    if let Some(existing) = last["parts"].as_array_mut() {
                        existing.extend(parts);
                    }
                }
                _ => contents.push(json!({ "role": role, "parts": parts })),
            }
        }

        contents
    }

    fn to_tools(tools: &[ToolDeclaration]) -> Vec<Value> {
        let declarations: Vec<Value> = tools
            .iter()
            .filter_map(|t| match t {
                ToolDeclaration::Function {
                    name,
                    description,
                    parameters,
                } => Some(json!({
                    "name": name,
                    "description": description,
                    "parameters": parameters,
                })),
                ToolDeclaration::Builtin { .. } => None,
            })
            .collect();

        let mut out: Vec<Value> = tools
            .iter()
            .filter_map(|t| match t {
                ToolDeclaration::Builtin { spec, .. } => Some(spec.clone()),
                ToolDeclaration::Function { .. } => None,
            })
            .collect();
        if !declarations.is_empty() {
            out.insert(0, json!({ "functionDeclarations": declarations }));
        }
        out
    }

    fn headers(settings: &ProviderSettings) -> Vec<(String, String)> {
        vec![("x-goog-api-key".into(), settings.api_key().to_string())]
    }
}

#[async_trait]
impl ProtocolAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn default_check_model(&self) -> &'static str {
        "gemini-1.5-flash-latest"
    }

    fn build_request(
        &self,
        request: &UnifiedChatRequest,
        settings: &ProviderSettings,
    ) -> Result<WireRequest, ChatError> {
        let (system, messages) = extract_system(&request.messages);
        let sampling = &request.sampling;

        let mut body = json!({ "contents": Self::to_contents(&messages) });

        if let Some(sys) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": sys }] });
        }

        let mut generation = serde_json::Map::new();
        if let Some(t) = sampling.temperature {
            generation.insert("temperature".into(), json!(t));
        }
        if let Some(p) = sampling.top_p {
            generation.insert("topP".into(), json!(p));
        }
        if let Some(k) = sampling.top_k {
            generation.insert("topK".into(), json!(k));
        }
        if let Some(max) = sampling.max_tokens {
            generation.insert("maxOutputTokens".into(), json!(max));
        }
        if let Some(p) = sampling.presence_penalty {
            generation.insert("presencePenalty".into(), json!(p));
        }
        if let Some(p) = sampling.frequency_penalty {
            generation.insert("frequencyPenalty".into(), json!(p));
        }
        if let Some(seed) = sampling.seed {
            generation.insert("seed".into(), json!(seed));
        }
        if !sampling.stop.is_empty() {
            generation.insert("stopSequences".into(), json!(sampling.stop));
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }

        if !request.tools.is_empty() {
            body["tools"] = Value::Array(Self::to_tools(&request.tools));
        }

        finalize_body(&mut body, request, settings)?;

        debug!(provider = %settings.id, model = %request.model, "Built generateContent request");

        let mut headers = Self::headers(settings);
        headers.push(("Content-Type".into(), "application/json".into()));

        Ok(WireRequest {
            url: format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                safe_base_url(&settings.base_url),
                request.model
            ),
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
        let chunk: Value = match serde_json::from_str(&frame.data) {
            Ok(v) => v,
            Err(e) => {
                trace!(provider = %provider, error = %e, "Ignoring unparseable Gemini SSE");
                return Vec::new();
            }
        };

        if chunk.get("error").is_some() {
            return state.fail(normalize_error(provider, None, &chunk));
        }

        let mut events = Vec::new();
        let candidate = &chunk["candidates"][0];

        for part in candidate["content"]["parts"].as_array().into_iter().flatten() {
            if let Some(call) = part.get("functionCall") {
                let index = next_call_index(state);
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                state.begin_tool_call(index, None, call["name"].as_str());
                state.push_arguments(index, &args.to_string());
                continue;
            }
            let Some(text) = part["text"].as_str().filter(|t| !t.is_empty()) else {
                continue;
            };
            if part["thought"].as_bool() == Some(true) {
                events.push(UnifiedStreamEvent::reasoning(text));
            } else {
                events.push(UnifiedStreamEvent::content(text));
            }
        }

        if let Some(reason) = candidate["finishReason"].as_str() {
            state.set_finish_reason(reason);
        }

        // Cumulative: keep only the latest report
        if let Some(usage) = chunk.get("usageMetadata").and_then(normalize_usage) {
            state.replace_usage(usage);
        }

        events
    }

    async fn list_models(
        &self,
        settings: &ProviderSettings,
        transport: &dyn Transport,
    ) -> Result<Vec<ModelInfo>, ChatError> {
        let base = safe_base_url(&settings.base_url);
        let headers = Self::headers(settings);
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_MODEL_PAGES {
            let mut url = format!("{base}/v1beta/models?pageSize=100");
            if let Some(token) = &page_token {
                url.push_str("&pageToken=");
                url.push_str(token);
            }
            let body = transport.get_json(&settings.id, &url, &headers).await?;

            for m in body["models"].as_array().into_iter().flatten() {
                let supports_generate = m["supportedGenerationMethods"]
                    .as_array()
                    .is_some_and(|methods| methods.iter().any(|x| x == "generateContent"));
                let Some(name) = m["name"].as_str() else {
                    continue;
                };
                if supports_generate {
                    models.push(ModelInfo {
                        id: name.trim_start_matches("models/").to_string(),
                        name: m["displayName"].as_str().map(String::from),
                    });
                }
            }

            page_token = body["nextPageToken"]
                .as_str()
                .filter(|t| !t.is_empty())
                .map(String::from);
            if page_token.is_none() {
                break;
            }
        }

        Ok(models)
    }
}

/// Gemini calls carry no index; number them in arrival order.
fn next_call_index(state: &StreamState) -> u32 {
    (0..).find(|i| !state.has_tool_call(*i)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use chatforge_core::ToolCall;
    use std::collections::HashMap;

    fn feed(frames: &[&str]) -> (Vec<UnifiedStreamEvent>, StreamState) {
        let adapter = GeminiAdapter::new();
        let mut state = StreamState::new();
        let events = frames
            .iter()
            .flat_map(|f| adapter.parse_event("gemini", &SseFrame::data(*f), &mut state))
            .collect();
        (events, state)
    }

    #[test]
    fn safe_base_url_rejects_foreign_hosts() {
        assert_eq!(
            safe_base_url("https://generativelanguage.googleapis.com/"),
            "https://generativelanguage.googleapis.com"
        );
        assert_eq!(
            safe_base_url("https://eu-aiplatform.googleapis.com"),
            "https://eu-aiplatform.googleapis.com"
        );
        assert_eq!(safe_base_url("http://generativelanguage.googleapis.com"), GEMINI_DEFAULT_BASE_URL);
        assert_eq!(safe_base_url("https://evil.example.com"), GEMINI_DEFAULT_BASE_URL);
        assert_eq!(safe_base_url("not a url"), GEMINI_DEFAULT_BASE_URL);
    }

    #[test]
    fn build_request_maps_roles_and_function_parts() {
        let call = ToolCall::new("c1", "web_search", r#"{"query":"rust"}"#);
        let mut assistant = Message::assistant("");
        assistant.tool_calls = vec![call.clone()];
        let request = UnifiedChatRequest {
            messages: vec![
                Message::system("Be brief"),
                Message::user("hi"),
                assistant,
                Message::tool_result(&call, "results"),
            ],
            model: "gemini-2.0-flash".into(),
            tools: vec![ToolDeclaration::Function {
                name: "web_search".into(),
                description: "Search".into(),
                parameters: json!({"type": "object"}),
            }],
            sampling: chatforge_core::SamplingParams {
                max_tokens: Some(100),
                ..Default::default()
            },
            ..Default::default()
        };
        let settings = ProviderSettings::new("gemini", GEMINI_DEFAULT_BASE_URL).with_api_key("g-key");
        let wire = GeminiAdapter::new().build_request(&request, &settings).unwrap();

        assert!(wire.url.ends_with("/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"));
        assert_eq!(wire.header("x-goog-api-key"), Some("g-key"));
        let body = &wire.body;
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["functionCall"]["args"]["query"], "rust");
        assert_eq!(body["contents"][2]["parts"][0]["functionResponse"]["name"], "web_search");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 100);
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "web_search");
    }

    #[test]
    fn parse_thought_text_and_cumulative_usage() {
        let (mut events, mut state) = feed(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"thinking...","thought":true}]}}],"usageMetadata":{"promptTokenCount":5,"totalTokenCount":5}}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"4"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":1,"totalTokenCount":6}}"#,
        ]);
        events.extend(GeminiAdapter::new().end_of_stream(&mut state));

        let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["reasoning_delta", "content_delta", "usage", "done"]);
        match &events[2] {
            UnifiedStreamEvent::Usage { usage } => assert_eq!(usage.total_tokens, 6),
            _ => unreachable!(),
        }
    }

    #[test]
    fn function_calls_are_complete_on_arrival() {
        let (_, mut state) = feed(&[
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"a","args":{"x":1}}},{"functionCall":{"name":"b","args":{}}}]}}]}"#,
        ]);
        let events = state.finish();
        let calls: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                UnifiedStreamEvent::ToolCall { call } => Some(call),
                _ => None,
            })
            .collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[0].parsed_arguments().unwrap()["x"], 1);
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[tokio::test]
    async fn list_models_follows_pages_and_filters() {
        let app = Router::new().route(
            "/v1beta/models",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                if q.get("pageToken").map(String::as_str) == Some("p2") {
                    Json(json!({"models": [
                        {"name": "models/gemini-2.0-flash", "supportedGenerationMethods": ["generateContent"]}
                    ]}))
                } else {
                    Json(json!({"models": [
                        {"name": "models/gemini-1.5-pro", "displayName": "Gemini 1.5 Pro", "supportedGenerationMethods": ["generateContent", "countTokens"]},
                        {"name": "models/embedding-001", "supportedGenerationMethods": ["embedContent"]}
                    ], "nextPageToken": "p2"}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        // Base URLs are pinned to Google hosts; redirect them to the local server
        struct Rewrite(crate::transport::HttpTransport, String);
        #[async_trait]
        impl Transport for Rewrite {
            async fn open_stream(
                &self,
                provider: &str,
                request: WireRequest,
            ) -> Result<crate::transport::FrameReceiver, ChatError> {
                self.0.open_stream(provider, request).await
            }
            async fn get_json(
                &self,
                provider: &str,
                url: &str,
                headers: &[(String, String)],
            ) -> Result<Value, ChatError> {
                let local = url.replace(GEMINI_DEFAULT_BASE_URL, &self.1);
                self.0.get_json(provider, &local, headers).await
            }
        }

        let transport = Rewrite(
            crate::transport::HttpTransport::new(std::time::Duration::from_secs(5)).unwrap(),
            format!("http://{addr}"),
        );
        let settings = ProviderSettings::new("gemini", GEMINI_DEFAULT_BASE_URL);
        let models = GeminiAdapter::new().list_models(&settings, &transport).await.unwrap();
        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["gemini-1.5-pro", "gemini-2.0-flash"]);
        assert_eq!(models[0].name.as_deref(), Some("Gemini 1.5 Pro"));
    }
}
