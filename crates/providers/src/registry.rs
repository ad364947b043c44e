//! Adapter registry: selects the protocol adapter for each configured
//! provider.
//!
//! Provider ids resolve to a closed set of adapter families once, at
//! construction. Unknown or disabled ids are rejected with
//! `ConfigurationMissing` rather than silently defaulted.

use std::collections::HashMap;
use std::sync::Arc;

use chatforge_config::{AppConfig, ProviderConfig};
use chatforge_core::{ChatError, UnifiedChatRequest};
use tracing::{debug, warn};

use crate::adapter::{
    CollectedResponse, ConnectivityCheck, ModelInfo, ProtocolAdapter, ProviderSettings, collect,
};
use crate::anthropic::AnthropicAdapter;
use crate::gemini::{GEMINI_DEFAULT_BASE_URL, GeminiAdapter};
use crate::openai::OpenAiAdapter;
use crate::transport::{FrameReceiver, Transport};

/// The wire protocol families we speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// `/chat/completions` and its many compatible hosts
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    /// Map a provider id or explicit `kind` to its family.
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "openai" | "deepseek" | "openrouter" | "moonshot" | "xai" | "mistral"
            | "siliconflow" | "zai" | "bailian" | "volcengine" | "ollama" | "groq"
            | "together" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            "gemini" | "google" => Some(ProviderKind::Gemini),
            _ => None,
        }
    }

    pub fn adapter(self) -> Arc<dyn ProtocolAdapter> {
        match self {
            ProviderKind::OpenAi => Arc::new(OpenAiAdapter::new()),
            ProviderKind::Anthropic => Arc::new(AnthropicAdapter::new()),
            ProviderKind::Gemini => Arc::new(GeminiAdapter::new()),
        }
    }
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_id: &str) -> Option<&'static str> {
    let url = match provider_id {
        "openai" => "https://api.openai.com/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "moonshot" => "https://api.moonshot.cn/v1",
        "xai" => "https://api.x.ai/v1",
        "mistral" => "https://api.mistral.ai/v1",
        "siliconflow" => "https://api.siliconflow.cn/v1",
        "zai" => "https://open.bigmodel.cn/api/paas/v4",
        "bailian" => "https://dashscope.aliyuncs.com/compatible-mode/v1",
        "volcengine" => "https://ark.cn-beijing.volces.com/api/v3",
        "ollama" => "http://localhost:11434/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "anthropic" => "https://api.anthropic.com",
        "gemini" | "google" => GEMINI_DEFAULT_BASE_URL,
        _ => return None,
    };
    Some(url)
}

/// An adapter bound to one provider's settings and a transport.
#[derive(Clone)]
pub struct ProviderHandle {
    adapter: Arc<dyn ProtocolAdapter>,
    settings: ProviderSettings,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("id", &self.settings.id)
            .finish_non_exhaustive()
    }
}

impl ProviderHandle {
    pub fn new(
        adapter: Arc<dyn ProtocolAdapter>,
        settings: ProviderSettings,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            adapter,
            settings,
            transport,
        }
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn adapter(&self) -> &dyn ProtocolAdapter {
        self.adapter.as_ref()
    }

    /// Build the wire request and open the upstream stream.
    pub async fn open(&self, request: &UnifiedChatRequest) -> Result<FrameReceiver, ChatError> {
        let wire = self.adapter.build_request(request, &self.settings)?;
        self.transport.open_stream(&self.settings.id, wire).await
    }

    /// Run a request to completion (non-interactive callers).
    pub async fn complete(
        &self,
        request: &UnifiedChatRequest,
    ) -> Result<CollectedResponse, ChatError> {
        collect(
            self.adapter.as_ref(),
            &self.settings,
            self.transport.as_ref(),
            request,
        )
        .await
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ChatError> {
        self.adapter
            .list_models(&self.settings, self.transport.as_ref())
            .await
    }

    pub async fn check(&self) -> ConnectivityCheck {
        self.adapter
            .check_connectivity(&self.settings, self.transport.as_ref())
            .await
    }
}

/// Routes provider ids to bound adapters.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    providers: HashMap<String, ProviderHandle>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: ProviderHandle) {
        self.providers.insert(handle.id().to_string(), handle);
    }

    /// Look up a provider. Unknown and disabled ids are configuration errors.
    pub fn resolve(&self, provider_id: &str) -> Result<ProviderHandle, ChatError> {
        self.providers.get(provider_id).cloned().ok_or_else(|| {
            ChatError::configuration_missing(format!(
                "provider '{provider_id}' is not configured or not enabled"
            ))
            .with_provider(provider_id)
        })
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.providers.contains_key(provider_id)
    }

    /// List all registered provider ids, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn settings_for(id: &str, config: &ProviderConfig, kind: ProviderKind) -> Option<ProviderSettings> {
    let base_url = config
        .base_url
        .clone()
        .or_else(|| default_base_url(id).map(String::from))
        .or_else(|| match kind {
            ProviderKind::Anthropic => default_base_url("anthropic").map(String::from),
            ProviderKind::Gemini => Some(GEMINI_DEFAULT_BASE_URL.to_string()),
            ProviderKind::OpenAi => None,
        })?;

    let mut settings = ProviderSettings::new(id, base_url).with_models(config.models.clone());
    settings.api_key = config.api_key.clone();
    settings.check_model = config.check_model.clone();
    Some(settings)
}

/// Build the registry from configuration. Enabled providers with a known
/// family are registered; everything else is logged and skipped.
pub fn build_from_config(config: &AppConfig, transport: Arc<dyn Transport>) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();

    for (id, provider_config) in &config.providers {
        if !provider_config.enabled {
            debug!(provider = %id, "Provider disabled, skipping");
            continue;
        }
        let Some(kind) = ProviderKind::from_id(provider_config.kind_or(id)) else {
            warn!(provider = %id, kind = %provider_config.kind_or(id), "Unknown provider kind, skipping");
            continue;
        };
        let Some(settings) = settings_for(id, provider_config, kind) else {
            warn!(provider = %id, "Provider has no base_url and no default, skipping");
            continue;
        };
        registry.register(ProviderHandle::new(kind.adapter(), settings, transport.clone()));
    }

    // The default provider is usable without an explicit table
    let default_id = &config.default_provider;
    if !config.providers.contains_key(default_id)
        && let Some(kind) = ProviderKind::from_id(default_id)
        && let Some(settings) = settings_for(default_id, &ProviderConfig::default(), kind)
    {
        registry.register(ProviderHandle::new(kind.adapter(), settings, transport));
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::WireRequest;
    use async_trait::async_trait;
    use chatforge_core::ErrorKind;

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn open_stream(
            &self,
            _provider: &str,
            _request: WireRequest,
        ) -> Result<FrameReceiver, ChatError> {
            Err(ChatError::internal("offline"))
        }
        async fn get_json(
            &self,
            _provider: &str,
            _url: &str,
            _headers: &[(String, String)],
        ) -> Result<serde_json::Value, ChatError> {
            Err(ChatError::internal("offline"))
        }
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").unwrap().contains("openrouter.ai"));
        assert!(default_base_url("ollama").unwrap().contains("localhost:11434"));
        assert!(default_base_url("nonexistent").is_none());
    }

    #[test]
    fn kinds_resolve_to_closed_families() {
        assert_eq!(ProviderKind::from_id("deepseek"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::from_id("anthropic"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::from_id("gemini"), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::from_id("made-up"), None);
    }

    #[test]
    fn build_from_default_config_registers_default() {
        let config = AppConfig::default();
        let registry = build_from_config(&config, Arc::new(NoTransport));
        assert!(registry.resolve("openai").is_ok());
    }

    #[test]
    fn unknown_and_disabled_providers_are_configuration_missing() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "mystery".into(),
            ProviderConfig {
                base_url: Some("https://example.com".into()),
                ..Default::default()
            },
        );
        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                enabled: false,
                ..Default::default()
            },
        );
        config.providers.insert(
            "corp".into(),
            ProviderConfig {
                kind: Some("openai".into()),
                base_url: Some("https://llm.corp.internal/v1".into()),
                ..Default::default()
            },
        );
        let registry = build_from_config(&config, Arc::new(NoTransport));

        let err = registry.resolve("mystery").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigurationMissing);
        assert!(registry.resolve("anthropic").is_err());
        let corp = registry.resolve("corp").unwrap();
        assert_eq!(corp.adapter().kind(), ProviderKind::OpenAi);
        assert_eq!(corp.settings().base_url, "https://llm.corp.internal/v1");
    }

    #[tokio::test]
    async fn check_reports_failure_as_data() {
        let registry = build_from_config(&AppConfig::default(), Arc::new(NoTransport));
        let check = registry.resolve("openai").unwrap().check().await;
        assert!(!check.success);
        assert_eq!(check.error.as_deref(), Some("offline"));
    }
}
