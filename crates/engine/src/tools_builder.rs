//! Per-turn tool declarations and the passthrough parameters that go with
//! them.

use chatforge_config::ModelConfig;
use chatforge_core::request::ToolDeclaration;
use chatforge_providers::{ProviderKind, ProviderSettings};
use chatforge_tools::ToolExecutor;
use chatforge_tools::formula::formula_uri;
use chatforge_tools::web_search::WEB_SEARCH_TOOL;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::request::{ChatRequest, SearchSourceKind};

const MOONSHOT: &str = "moonshot";
const DEFAULT_SEARCH_ENGINE: &str = "search_std";

/// Providers that take a `search_engine` parameter for builtin search.
const SEARCH_ENGINE_PROVIDERS: &[&str] = &["zai"];

/// Declarations plus the `extra` bag for one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnTools {
    pub tools: Vec<ToolDeclaration>,
    pub extra: Map<String, Value>,
}

/// Names of provider builtins to enable: builtin search when the source is
/// builtin (or unspecified and the model has one), then requested extras the
/// model supports.
pub fn enabled_builtins(request: &ChatRequest, model: Option<&ModelConfig>) -> Vec<String> {
    let supported: &[String] = model.map(|m| m.builtin_tools.as_slice()).unwrap_or_default();
    let has = |name: &str| supported.iter().any(|t| t == name);
    let mut names: Vec<String> = Vec::new();

    if request.web_search {
        let use_builtin = match request.search_source() {
            Some(SearchSourceKind::Builtin) => true,
            Some(SearchSourceKind::External) => false,
            None => has("web_search") || has("google_search"),
        };
        if use_builtin {
            names.extend(
                ["web_search", "google_search"]
                    .into_iter()
                    .filter(|n| has(n))
                    .map(String::from),
            );
        }
    }

    for tool in &request.enabled_tools {
        if has(tool) && !names.contains(tool) {
            names.push(tool.clone());
        }
    }
    names
}

/// Wire declaration of a provider builtin, or `None` when the family has no
/// such tool.
pub fn builtin_declaration(provider: &str, kind: ProviderKind, name: &str) -> Option<ToolDeclaration> {
    let (wire_name, spec) = match kind {
        ProviderKind::OpenAi if provider == MOONSHOT => {
            if name != "web_search" {
                return None;
            }
            (
                "$web_search",
                json!({"type": "builtin_function", "function": {"name": "$web_search"}}),
            )
        }
        ProviderKind::OpenAi => (name, json!({ "type": name })),
        ProviderKind::Anthropic => match name {
            "web_search" => (
                "web_search",
                json!({"type": "web_search_20250305", "name": "web_search"}),
            ),
            _ => return None,
        },
        ProviderKind::Gemini => match name {
            "web_search" | "google_search" => ("google_search", json!({"googleSearch": {}})),
            "code_execution" => ("code_execution", json!({"codeExecution": {}})),
            "url_context" => ("url_context", json!({"urlContext": {}})),
            _ => return None,
        },
    };
    Some(ToolDeclaration::Builtin {
        name: wire_name.to_string(),
        spec,
    })
}

fn passthrough_extra(request: &ChatRequest, provider: &str) -> Map<String, Value> {
    let mut extra = Map::new();
    let source = request.search_source();

    if source == Some(SearchSourceKind::Builtin)
        && let Some(options) = request.web_search_source.as_ref().and_then(|s| s.options.clone())
    {
        extra.insert("web_search_options".into(), Value::Object(options));
    }

    if request.web_search
        && source != Some(SearchSourceKind::External)
        && SEARCH_ENGINE_PROVIDERS.contains(&provider)
    {
        let engine = request
            .advanced_settings
            .as_ref()
            .and_then(|a| a.search_engine.clone())
            .unwrap_or_else(|| DEFAULT_SEARCH_ENGINE.to_string());
        extra.insert("search_engine".into(), Value::String(engine));
    }

    if let Some(advanced) = &request.advanced_settings {
        for (key, value) in &advanced.extra {
            extra.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    extra
}

/// Build the declaration list for one turn.
///
/// Moonshot's builtin web search is swapped for the formula tool it hosts;
/// if the formula listing fails the builtin stays.
pub async fn build_turn_tools(
    executor: &ToolExecutor,
    request: &ChatRequest,
    settings: &ProviderSettings,
    kind: ProviderKind,
    model: Option<&ModelConfig>,
) -> TurnTools {
    let provider = settings.id.as_str();
    let mut tools: Vec<ToolDeclaration> = Vec::new();

    for name in enabled_builtins(request, model) {
        let Some(declaration) = builtin_declaration(provider, kind, &name) else {
            debug!(provider, tool = %name, "Builtin not available for this provider");
            continue;
        };
        if provider == MOONSHOT
            && let Some(uri) = formula_uri(&name)
        {
            match executor
                .formula()
                .list_tools(&settings.base_url, settings.api_key(), uri)
                .await
            {
                Ok(formula_tools) if !formula_tools.is_empty() => {
                    info!(uri, count = formula_tools.len(), "Using formula tools for builtin search");
                    tools.extend(formula_tools);
                    continue;
                }
                Ok(_) => warn!(uri, "Formula exposes no tools, keeping builtin"),
                Err(e) => warn!(uri, error = %e, "Formula tools unavailable, keeping builtin"),
            }
        }
        tools.push(declaration);
    }

    if request.uses_external_search()
        && let Some(tool) = executor.registry().get(WEB_SEARCH_TOOL)
    {
        tools.push(tool.to_declaration());
    }

    if let Some(mcp) = executor.mcp()
        && !mcp.is_empty()
    {
        tools.extend(mcp.declarations().await);
    }

    let mut seen = std::collections::HashSet::new();
    tools.retain(|t| seen.insert(t.name().to_string()));

    TurnTools {
        tools,
        extra: passthrough_extra(request, provider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::WebSearchSource;
    use async_trait::async_trait;
    use chatforge_core::error::ChatError;
    use chatforge_core::message::Message;
    use chatforge_core::search::{WebSearch, WebSearchResult};
    use chatforge_tools::{ToolRegistry, WebSearchTool};
    use std::sync::Arc;
    use std::time::Duration;

    struct NoSearch;

    #[async_trait]
    impl WebSearch for NoSearch {
        async fn search(&self, _: &str) -> Result<Option<WebSearchResult>, ChatError> {
            Ok(None)
        }
    }

    fn model(builtins: &[&str]) -> ModelConfig {
        ModelConfig {
            id: "m".into(),
            name: None,
            reasoning: None,
            builtin_tools: builtins.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn request(web_search: bool, source: Option<&str>) -> ChatRequest {
        ChatRequest {
            messages: vec![Message::user("hi")],
            web_search,
            web_search_source: source.map(|kind| WebSearchSource {
                kind: kind.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn executor_with_search() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(WebSearchTool::new(Arc::new(NoSearch))));
        ToolExecutor::new(registry, Duration::from_secs(5))
    }

    #[test]
    fn builtin_selection() {
        let gemini = model(&["google_search", "code_execution"]);
        assert_eq!(enabled_builtins(&request(true, None), Some(&gemini)), vec!["google_search"]);
        assert!(enabled_builtins(&request(true, Some("external")), Some(&gemini)).is_empty());
        assert!(enabled_builtins(&request(false, None), Some(&gemini)).is_empty());

        let mut req = request(false, None);
        req.enabled_tools = vec!["code_execution".into(), "teleport".into()];
        assert_eq!(enabled_builtins(&req, Some(&gemini)), vec!["code_execution"]);

        assert!(enabled_builtins(&request(true, Some("builtin")), None).is_empty());
    }

    #[test]
    fn wire_specs_per_family() {
        let moonshot = builtin_declaration("moonshot", ProviderKind::OpenAi, "web_search").unwrap();
        assert_eq!(moonshot.name(), "$web_search");
        let openai = builtin_declaration("openai", ProviderKind::OpenAi, "web_search").unwrap();
        assert_eq!(
            openai,
            ToolDeclaration::Builtin {
                name: "web_search".into(),
                spec: json!({"type": "web_search"})
            }
        );
        let claude = builtin_declaration("anthropic", ProviderKind::Anthropic, "web_search").unwrap();
        assert!(matches!(claude, ToolDeclaration::Builtin { ref spec, .. } if spec["type"] == "web_search_20250305"));
        assert!(builtin_declaration("anthropic", ProviderKind::Anthropic, "code_execution").is_none());
        let gemini = builtin_declaration("gemini", ProviderKind::Gemini, "code_execution").unwrap();
        assert!(matches!(gemini, ToolDeclaration::Builtin { ref spec, .. } if spec.get("codeExecution").is_some()));
    }

    #[tokio::test]
    async fn external_search_adds_function_tool() {
        let executor = executor_with_search();
        let settings = ProviderSettings::new("openai", "https://api.openai.com/v1");
        let built = build_turn_tools(
            &executor,
            &request(true, Some("external")),
            &settings,
            ProviderKind::OpenAi,
            Some(&model(&["web_search"])),
        )
        .await;
        assert_eq!(built.tools.len(), 1);
        assert!(matches!(&built.tools[0], ToolDeclaration::Function { name, .. } if name == "web_search"));
        assert!(built.extra.is_empty());
    }

    #[tokio::test]
    async fn builtin_options_and_search_engine_pass_through() {
        let executor = executor_with_search();
        let mut req = request(true, Some("builtin"));
        if let Some(source) = req.web_search_source.as_mut() {
            let mut options = Map::new();
            options.insert("search_context_size".into(), json!("high"));
            source.options = Some(options);
        }

        let settings = ProviderSettings::new("zai", "https://open.bigmodel.cn/api/paas/v4");
        let built = build_turn_tools(
            &executor,
            &req,
            &settings,
            ProviderKind::OpenAi,
            Some(&model(&["web_search"])),
        )
        .await;
        assert_eq!(built.tools.len(), 1);
        assert_eq!(built.extra["web_search_options"]["search_context_size"], "high");
        assert_eq!(built.extra["search_engine"], "search_std");
    }

    #[tokio::test]
    async fn moonshot_keeps_builtin_when_formula_listing_fails() {
        let executor = executor_with_search();
        // Nothing listens on port 9; the listing fails fast
        let settings = ProviderSettings::new("moonshot", "http://127.0.0.1:9/v1").with_api_key("k");
        let built = build_turn_tools(
            &executor,
            &request(true, Some("builtin")),
            &settings,
            ProviderKind::OpenAi,
            Some(&model(&["web_search"])),
        )
        .await;
        assert_eq!(built.tools.len(), 1);
        assert_eq!(built.tools[0].name(), "$web_search");
    }
}
