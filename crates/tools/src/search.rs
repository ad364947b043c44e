//! External web search (Tavily, Brave, SearXNG).
//!
//! Every backend normalizes its hits into [`SearchHit`]s and renders the same
//! two artifacts: a JSON string persisted with the assistant message and a
//! context block prepended to the user's question.

use std::time::Duration;

use async_trait::async_trait;
use chatforge_config::SearchConfig;
use chatforge_core::error::{ChatError, ErrorKind};
use chatforge_core::search::{WebSearch, WebSearchResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Hits beyond this are dropped before rendering.
pub const MAX_RENDERED_RESULTS: usize = 5;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBackend {
    Tavily,
    Brave,
    Searxng,
}

impl SearchBackend {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "tavily" => Some(SearchBackend::Tavily),
            "brave" => Some(SearchBackend::Brave),
            "searxng" => Some(SearchBackend::Searxng),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SearchBackend::Tavily => "Tavily",
            SearchBackend::Brave => "Brave",
            SearchBackend::Searxng => "SearXNG",
        }
    }
}

/// One normalized search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Render hits into the persisted JSON and the prompt context block.
pub fn build_search_response(
    label: &str,
    hits: &[SearchHit],
    answer: Option<&str>,
) -> WebSearchResult {
    let capped = &hits[..hits.len().min(MAX_RENDERED_RESULTS)];

    let search_results = serde_json::json!({
        "provider": label,
        "answer": answer,
        "results": capped,
    })
    .to_string();

    let details: Vec<String> = capped
        .iter()
        .map(|h| format!("Title: {}\nURL: {}\nContent: {}", h.title, h.url, h.content))
        .collect();
    let summary = answer
        .map(|a| format!("Summary Answer: {a}\n"))
        .unwrap_or_default();

    let search_prompt = format!(
        "\nAdditional Context from Web Search ({label}):\n{summary}\nDetailed Results:\n{}\n\nPlease use the above information to provide a more accurate and up-to-date response if relevant.\n",
        details.join("\n\n")
    );

    WebSearchResult {
        search_results,
        search_prompt,
    }
}

// --- Backend response types ---

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
    #[serde(default)]
    answer: Option<String>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    raw_content: Option<String>,
}

#[derive(Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

#[derive(Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<SearxngResult>,
}

#[derive(Deserialize)]
struct SearxngResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: Option<String>,
}

/// The configured external search service.
pub struct ExternalSearch {
    client: reqwest::Client,
    config: SearchConfig,
}

impl ExternalSearch {
    pub fn new(config: SearchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Whether a search would actually be attempted.
    pub fn is_configured(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        match SearchBackend::from_id(&self.config.active_provider) {
            Some(SearchBackend::Searxng) => self.config.endpoint.is_some(),
            Some(_) => self.config.api_key.is_some(),
            None => false,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> ChatError {
        let kind = if err.is_timeout() {
            ErrorKind::UpstreamTimeout
        } else {
            ErrorKind::UpstreamServerError
        };
        ChatError::new(kind, format!("web search request failed: {err}"))
            .with_provider(self.config.active_provider.clone())
    }

    async fn checked_json<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ChatError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(provider = %self.config.active_provider, status = status.as_u16(), "Web search failed");
            return Err(ChatError::new(
                ErrorKind::UpstreamServerError,
                format!("web search returned {status}: {body}"),
            )
            .with_status(status.as_u16())
            .with_provider(self.config.active_provider.clone()));
        }
        response.json().await.map_err(|e| self.transport_error(e))
    }

    async fn tavily(&self, query: &str, api_key: &str) -> Result<Option<WebSearchResult>, ChatError> {
        let endpoint = self.config.endpoint.as_deref().unwrap_or(TAVILY_ENDPOINT);
        debug!(endpoint, "Calling Tavily");
        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({
                "api_key": api_key,
                "query": query,
                "search_depth": self.config.search_depth,
                "include_answer": true,
                "max_results": self.config.max_results,
            }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let data: TavilyResponse = self.checked_json(response).await?;

        let hits: Vec<SearchHit> = data
            .results
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                content: r.content.or(r.raw_content).unwrap_or_default(),
            })
            .collect();
        info!(results = hits.len(), "Tavily search completed");
        // Tavily results are rendered even when empty, the answer may carry it
        Ok(Some(build_search_response(
            SearchBackend::Tavily.label(),
            &hits,
            data.answer.as_deref(),
        )))
    }

    async fn brave(&self, query: &str, api_key: &str) -> Result<Option<WebSearchResult>, ChatError> {
        let endpoint = self.config.endpoint.as_deref().unwrap_or(BRAVE_ENDPOINT);
        let response = self
            .client
            .get(endpoint)
            .query(&[("q", query), ("count", &self.config.max_results.to_string())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let data: BraveResponse = self.checked_json(response).await?;

        let hits: Vec<SearchHit> = data
            .web
            .map(|w| w.results)
            .unwrap_or(data.results)
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                content: r.description.or(r.snippet).unwrap_or_default(),
            })
            .collect();
        if hits.is_empty() {
            return Ok(None);
        }
        info!(results = hits.len(), "Brave search completed");
        Ok(Some(build_search_response(SearchBackend::Brave.label(), &hits, None)))
    }

    async fn searxng(&self, query: &str, instance: &str) -> Result<Option<WebSearchResult>, ChatError> {
        let url = format!("{}/search", instance.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let data: SearxngResponse = self.checked_json(response).await?;

        let hits: Vec<SearchHit> = data
            .results
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                content: r.content.unwrap_or_default(),
            })
            .collect();
        if hits.is_empty() {
            return Ok(None);
        }
        info!(results = hits.len(), "SearXNG search completed");
        Ok(Some(build_search_response(SearchBackend::Searxng.label(), &hits, None)))
    }
}

#[async_trait]
impl WebSearch for ExternalSearch {
    async fn search(&self, query: &str) -> Result<Option<WebSearchResult>, ChatError> {
        if !self.config.enabled {
            debug!("Web search disabled, skipping");
            return Ok(None);
        }
        let Some(backend) = SearchBackend::from_id(&self.config.active_provider) else {
            warn!(provider = %self.config.active_provider, "Search provider not supported");
            return Ok(None);
        };

        info!(provider = backend.label(), query_len = query.len(), "Performing web search");
        match (backend, &self.config.api_key, &self.config.endpoint) {
            (SearchBackend::Tavily, Some(key), _) => self.tavily(query, key).await,
            (SearchBackend::Brave, Some(key), _) => self.brave(query, key).await,
            (SearchBackend::Searxng, _, Some(instance)) => self.searxng(query, instance).await,
            _ => {
                warn!(provider = backend.label(), "Search provider is missing credentials");
                Ok(None)
            }
        }
    }
}
