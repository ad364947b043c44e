//! The protocol adapter contract.
//!
//! An adapter is a pure translator between the unified request/event model
//! and one provider family's wire protocol. Adapters hold no per-turn state:
//! everything that must survive between frames of one stream lives in a
//! [`StreamState`] owned by the caller.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chatforge_config::{ModelConfig, ReasoningCapability};
use chatforge_core::{
    ChatError, Message, SamplingParams, StreamUsage, ToolCall, UnifiedChatRequest,
    UnifiedStreamEvent,
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::registry::ProviderKind;
use crate::sse::SseFrame;
use crate::transport::Transport;

/// Resolved, read-only configuration for one provider.
#[derive(Clone, Default)]
pub struct ProviderSettings {
    pub id: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub models: Vec<ModelConfig>,
    pub check_model: Option<String>,
}

impl ProviderSettings {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_models(mut self, models: Vec<ModelConfig>) -> Self {
        self.models = models;
        self
    }

    /// Native reasoning capability declared for `model`.
    pub fn reasoning_for(&self, model: &str) -> Option<&ReasoningCapability> {
        self.models
            .iter()
            .find(|m| m.id == model)
            .and_then(|m| m.reasoning.as_ref())
    }

    pub fn api_key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("models", &self.models.len())
            .field("check_model", &self.check_model)
            .finish()
    }
}

/// A fully built HTTP request, ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl WireRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Result of a connectivity check. Never an error: failures are data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityCheck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectivityCheck {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

// ── Per-stream state ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Everything an adapter needs to remember between frames of one stream.
///
/// Created by the caller per upstream request and dropped with it.
#[derive(Debug, Default)]
pub struct StreamState {
    tool_calls: BTreeMap<u32, PendingToolCall>,
    /// For providers that report cumulative usage on every chunk
    latest_usage: Option<StreamUsage>,
    finish_reason: Option<String>,
    finished: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or update) the tool call at `index`.
    pub fn begin_tool_call(&mut self, index: u32, id: Option<&str>, name: Option<&str>) {
        let pending = self.tool_calls.entry(index).or_default();
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            pending.id = id.to_string();
        }
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            pending.name = name.to_string();
        }
    }

    /// Append an argument fragment to the tool call at `index`.
    pub fn push_arguments(&mut self, index: u32, fragment: &str) {
        self.tool_calls
            .entry(index)
            .or_default()
            .arguments
            .push_str(fragment);
    }

    pub fn has_tool_call(&self, index: u32) -> bool {
        self.tool_calls.contains_key(&index)
    }

    pub fn set_finish_reason(&mut self, reason: impl Into<String>) {
        self.finish_reason = Some(reason.into());
    }

    /// Remember a cumulative usage report; only the last one is emitted.
    pub fn replace_usage(&mut self, usage: StreamUsage) {
        self.latest_usage = Some(usage);
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Terminate the stream: flush assembled tool calls (in emission order),
    /// any held usage, then `done`. Subsequent calls yield nothing.
    pub fn finish(&mut self) -> Vec<UnifiedStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        if let Some(usage) = self.latest_usage.take() {
            events.push(UnifiedStreamEvent::Usage { usage });
        }
        for (index, pending) in std::mem::take(&mut self.tool_calls) {
            if pending.name.is_empty() {
                debug!(index, "Dropping tool call without a name");
                continue;
            }
            let id = if pending.id.is_empty() {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                pending.id
            };
            events.push(UnifiedStreamEvent::ToolCall {
                call: ToolCall::new(id, pending.name, pending.arguments),
            });
        }
        events.push(UnifiedStreamEvent::done(self.finish_reason.take()));
        events
    }

    /// Terminate the stream with an error.
    pub fn fail(&mut self, error: ChatError) -> Vec<UnifiedStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        self.tool_calls.clear();
        vec![UnifiedStreamEvent::Error { error }]
    }
}

// ── Adapter trait ─────────────────────────────────────────────────────────

/// Translator for one provider wire protocol.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model used by connectivity checks when the provider configures none.
    fn default_check_model(&self) -> &'static str;

    /// Translate a unified request into the provider's streaming request.
    fn build_request(
        &self,
        request: &UnifiedChatRequest,
        settings: &ProviderSettings,
    ) -> Result<WireRequest, ChatError>;

    /// Parse one SSE frame into zero or more unified events.
    fn parse_event(
        &self,
        provider: &str,
        frame: &SseFrame,
        state: &mut StreamState,
    ) -> Vec<UnifiedStreamEvent>;

    /// The byte stream ended. Emits the terminal event if none was seen.
    fn end_of_stream(&self, state: &mut StreamState) -> Vec<UnifiedStreamEvent> {
        state.finish()
    }

    async fn list_models(
        &self,
        settings: &ProviderSettings,
        transport: &dyn Transport,
    ) -> Result<Vec<ModelInfo>, ChatError>;

    /// Minimal completion against the check model.
    async fn check_connectivity(
        &self,
        settings: &ProviderSettings,
        transport: &dyn Transport,
    ) -> ConnectivityCheck {
        let model = settings
            .check_model
            .clone()
            .or_else(|| settings.models.first().map(|m| m.id.clone()))
            .unwrap_or_else(|| self.default_check_model().to_string());

        let request = UnifiedChatRequest {
            messages: vec![Message::user("Hi")],
            model,
            provider: settings.id.clone(),
            sampling: SamplingParams {
                max_tokens: Some(5),
                ..Default::default()
            },
            ..Default::default()
        };

        match collect(self, settings, transport, &request).await {
            Ok(_) => ConnectivityCheck::ok(),
            Err(e) => ConnectivityCheck::failed(e.message),
        }
    }
}

/// A whole response gathered from a stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedResponse {
    pub content: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: StreamUsage,
    pub finish_reason: Option<String>,
}

/// Run one request to completion and gather every event. The first error
/// event becomes the returned error.
pub async fn collect<A: ProtocolAdapter + ?Sized>(
    adapter: &A,
    settings: &ProviderSettings,
    transport: &dyn Transport,
    request: &UnifiedChatRequest,
) -> Result<CollectedResponse, ChatError> {
    let wire = adapter.build_request(request, settings)?;
    let mut frames = transport.open_stream(&settings.id, wire).await?;
    let mut state = StreamState::new();
    let mut response = CollectedResponse::default();

    loop {
        let events = match frames.recv().await {
            Some(Ok(frame)) => adapter.parse_event(&settings.id, &frame, &mut state),
            Some(Err(e)) => state.fail(e),
            None => adapter.end_of_stream(&mut state),
        };

        for event in events {
            match event {
                UnifiedStreamEvent::ContentDelta { delta } => response.content.push_str(&delta),
                UnifiedStreamEvent::ReasoningDelta { delta } => {
                    response.reasoning.push_str(&delta)
                }
                UnifiedStreamEvent::ToolCall { call } => response.tool_calls.push(call),
                UnifiedStreamEvent::Usage { usage } => response.usage += usage,
                UnifiedStreamEvent::Error { error } => return Err(error),
                UnifiedStreamEvent::Done { finish_reason } => {
                    response.finish_reason = finish_reason;
                    return Ok(response);
                }
            }
        }
    }
}

/// Split a slice of messages into the joined system prompt and the rest.
pub(crate) fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut rest: Vec<&Message> = Vec::new();

    for msg in messages {
        match msg.role {
            chatforge_core::Role::System => system_parts.push(&msg.content),
            chatforge_core::Role::Data => {}
            _ => rest.push(msg),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, rest)
}

/// Merge caller passthrough parameters and the reasoning patch into a body.
pub(crate) fn finalize_body(
    body: &mut Value,
    request: &UnifiedChatRequest,
    settings: &ProviderSettings,
) -> Result<(), ChatError> {
    if !request.extra.is_empty() {
        crate::reasoning::deep_merge(body, &Value::Object(request.extra.clone()));
    }
    if let Some(capability) = settings.reasoning_for(&request.model)
        && let Some(patch) = crate::reasoning::map_reasoning(capability, &request.reasoning)?
    {
        debug!(mode = ?patch.mode, model = %request.model, "Applying reasoning patch");
        patch.apply(body)?;
    }
    Ok(())
}
