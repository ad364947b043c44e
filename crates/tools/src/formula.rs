//! Provider-hosted "formula" tools (Moonshot).
//!
//! A formula is addressed by URI. Its tool declarations are fetched from
//! `{base}/formulas/{uri}/tools` and each call runs as a "fiber" posted to
//! `{base}/formulas/{uri}/fibers`.

use std::time::Duration;

use chatforge_core::error::{ChatError, ErrorKind};
use chatforge_core::request::ToolDeclaration;
use serde::Deserialize;
use tracing::{info, warn};

/// Map a function name the model may call to the formula hosting it.
pub fn formula_uri(function_name: &str) -> Option<&'static str> {
    match function_name {
        "web_search" | "web-search" => Some("moonshot/web-search:latest"),
        _ => None,
    }
}

#[derive(Deserialize)]
struct ToolsResponse {
    #[serde(default)]
    tools: Vec<FormulaToolSpec>,
}

#[derive(Deserialize)]
struct FormulaToolSpec {
    function: FormulaFunction,
}

#[derive(Deserialize)]
struct FormulaFunction {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Fiber {
    #[serde(default)]
    id: String,
    status: String,
    #[serde(default)]
    context: Option<FiberContext>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FiberContext {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    encrypted_output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

impl Fiber {
    /// Content handed back to the model. Protected formulas return
    /// `encrypted_output`, which is passed through untouched.
    fn into_content(self) -> String {
        let context = self.context.unwrap_or_default();
        if self.status == "succeeded" {
            return non_empty(&context.encrypted_output)
                .or(non_empty(&context.output))
                .unwrap_or("")
                .to_string();
        }
        let message = non_empty(&self.error)
            .or(non_empty(&context.error))
            .or(non_empty(&context.output))
            .unwrap_or("Unknown error");
        format!("Error: {message}")
    }
}

#[derive(Clone)]
pub struct FormulaClient {
    client: reqwest::Client,
}

impl FormulaClient {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Fetch the function declarations a formula exposes.
    pub async fn list_tools(
        &self,
        base_url: &str,
        api_key: &str,
        uri: &str,
    ) -> Result<Vec<ToolDeclaration>, ChatError> {
        let url = format!("{}/formulas/{uri}/tools", base_url.trim_end_matches('/'));
        info!(uri, "Fetching formula tools");

        let response = self
            .client
            .get(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| {
                ChatError::new(ErrorKind::UpstreamServerError, format!("formula tools: {e}"))
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::new(
                ErrorKind::UpstreamServerError,
                format!("failed to fetch formula tools: {status} {body}"),
            )
            .with_status(status.as_u16()));
        }
        let data: ToolsResponse = response.json().await.map_err(|e| {
            ChatError::new(ErrorKind::UpstreamServerError, format!("formula tools: {e}"))
        })?;

        Ok(data
            .tools
            .into_iter()
            .map(|t| ToolDeclaration::Function {
                name: t.function.name,
                description: t.function.description,
                parameters: t.function.parameters,
            })
            .collect())
    }

    /// Run one fiber. Never fails: HTTP and fiber errors come back as
    /// `Error: ...` content.
    pub async fn call(
        &self,
        base_url: &str,
        api_key: &str,
        uri: &str,
        function_name: &str,
        arguments: &serde_json::Value,
    ) -> String {
        let url = format!("{}/formulas/{uri}/fibers", base_url.trim_end_matches('/'));
        info!(uri, function_name, "Calling formula tool");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "name": function_name,
                "arguments": arguments.to_string(),
            }))
            .send()
            .await;
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(function_name, error = %e, "Formula request failed");
                return format!("Error: {e}");
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(function_name, status = status.as_u16(), "Formula tool call failed");
            return format!("Error: Formula tool call failed: {status} {body}");
        }

        match response.json::<Fiber>().await {
            Ok(fiber) => {
                info!(fiber_id = %fiber.id, status = %fiber.status, "Formula tool response");
                fiber.into_content()
            }
            Err(e) => format!("Error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::{get, post}};
    use axum::http::HeaderMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fiber(json: serde_json::Value) -> Fiber {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn uri_mapping() {
        assert_eq!(formula_uri("web_search"), Some("moonshot/web-search:latest"));
        assert_eq!(formula_uri("web-search"), Some("moonshot/web-search:latest"));
        assert_eq!(formula_uri("calculator"), None);
    }

    #[test]
    fn fiber_content_precedence() {
        let ok = fiber(serde_json::json!({
            "id": "f1", "status": "succeeded",
            "context": {"output": "plain", "encrypted_output": "sealed"}
        }));
        assert_eq!(ok.into_content(), "sealed");

        let plain = fiber(serde_json::json!({"status": "succeeded", "context": {"output": "plain"}}));
        assert_eq!(plain.into_content(), "plain");

        let failed = fiber(serde_json::json!({"status": "failed", "context": {"error": "quota"}}));
        assert_eq!(failed.into_content(), "Error: quota");

        let pending = fiber(serde_json::json!({"status": "pending"}));
        assert_eq!(pending.into_content(), "Error: Unknown error");
    }

    #[tokio::test]
    async fn call_posts_fiber_with_string_arguments() {
        let router = Router::new().route(
            "/v1/formulas/{*rest}",
            post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-moon");
                assert_eq!(body["name"], "web_search");
                let args: serde_json::Value =
                    serde_json::from_str(body["arguments"].as_str().unwrap()).unwrap();
                assert_eq!(args["query"], "weather");
                Json(serde_json::json!({
                    "id": "fb-1", "status": "succeeded",
                    "context": {"encrypted_output": "opaque"}
                }))
            }),
        );
        let base = serve(router).await;
        let client = FormulaClient::new(Duration::from_secs(5));
        let out = client
            .call(
                &format!("{base}/v1"),
                "sk-moon",
                "moonshot/web-search:latest",
                "web_search",
                &serde_json::json!({"query": "weather"}),
            )
            .await;
        assert_eq!(out, "opaque");
    }

    #[tokio::test]
    async fn http_errors_become_error_content() {
        let base = serve(Router::new()).await;
        let client = FormulaClient::new(Duration::from_secs(5));
        let out = client
            .call(&base, "k", "moonshot/web-search:latest", "web_search", &serde_json::json!({}))
            .await;
        assert!(out.starts_with("Error: Formula tool call failed: 404"));
    }

    #[tokio::test]
    async fn list_tools_maps_declarations() {
        let router = Router::new().route(
            "/formulas/{*rest}",
            get(|| async {
                Json(serde_json::json!({"tools": [{
                    "type": "function",
                    "function": {"name": "web_search", "description": "search", "parameters": {"type": "object"}}
                }]}))
            }),
        );
        let base = serve(router).await;
        let client = FormulaClient::new(Duration::from_secs(5));
        let tools = client
            .list_tools(&base, "k", "moonshot/web-search:latest")
            .await
            .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "web_search");
    }
}
