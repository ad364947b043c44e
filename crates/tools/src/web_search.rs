//! The `web_search` function tool, backed by the external search service.
//!
//! Failures are reported in-band as a JSON `error` object the model can
//! react to.

use std::sync::Arc;

use async_trait::async_trait;
use chatforge_core::error::ToolError;
use chatforge_core::search::WebSearch;
use chatforge_core::tool::{Tool, ToolContext};
use serde_json::json;
use tracing::warn;

pub const WEB_SEARCH_TOOL: &str = "web_search";

pub struct WebSearchTool {
    search: Arc<dyn WebSearch>,
}

impl WebSearchTool {
    pub fn new(search: Arc<dyn WebSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search the web for up-to-date information. Use this when you need current events, recent data, or information beyond your knowledge cutoff."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "number",
                    "description": "Number of results to return (default 5)",
                    "default": 5
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let Some(query) = arguments["query"].as_str().filter(|q| !q.trim().is_empty()) else {
            return Ok(json!({"error": "Missing or invalid query parameter"}).to_string());
        };

        let output = match self.search.search(query).await {
            Ok(Some(result)) => {
                let results: serde_json::Value = serde_json::from_str(&result.search_results)
                    .unwrap_or(serde_json::Value::String(result.search_results));
                json!({
                    "success": true,
                    "results": results,
                    "context": result.search_prompt,
                })
            }
            Ok(None) => json!({"error": "Search failed or no results found"}),
            Err(e) => {
                warn!(error = %e, "web_search tool failed");
                json!({"error": "Search execution failed"})
            }
        };
        Ok(output.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatforge_core::error::ChatError;
    use chatforge_core::search::WebSearchResult;

    enum Canned {
        Hit,
        Empty,
        Fail,
    }

    #[async_trait]
    impl WebSearch for Canned {
        async fn search(&self, query: &str) -> Result<Option<WebSearchResult>, ChatError> {
            match self {
                Canned::Hit => Ok(Some(WebSearchResult {
                    search_results: json!({"provider": "Tavily", "q": query}).to_string(),
                    search_prompt: "context".into(),
                })),
                Canned::Empty => Ok(None),
                Canned::Fail => Err(ChatError::timeout("slow")),
            }
        }
    }

    async fn run(canned: Canned, args: serde_json::Value) -> serde_json::Value {
        let tool = WebSearchTool::new(Arc::new(canned));
        let out = tool.execute(args, &ToolContext::default()).await.unwrap();
        serde_json::from_str(&out).unwrap()
    }

    #[tokio::test]
    async fn success_embeds_results_and_context() {
        let out = run(Canned::Hit, json!({"query": "rust"})).await;
        assert_eq!(out["success"], true);
        assert_eq!(out["results"]["q"], "rust");
        assert_eq!(out["context"], "context");
    }

    #[tokio::test]
    async fn failures_are_in_band() {
        let out = run(Canned::Hit, json!({"num_results": 3})).await;
        assert_eq!(out["error"], "Missing or invalid query parameter");
        let out = run(Canned::Empty, json!({"query": "x"})).await;
        assert_eq!(out["error"], "Search failed or no results found");
        let out = run(Canned::Fail, json!({"query": "x"})).await;
        assert_eq!(out["error"], "Search execution failed");
    }
}
