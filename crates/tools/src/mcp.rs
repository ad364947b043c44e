//! Tools exposed by remote MCP servers.
//!
//! Each plugin is a JSON-RPC 2.0 endpoint speaking the streamable-HTTP
//! transport: every call is a POST that answers either with a JSON body or an
//! SSE stream carrying the response. A session opens with `initialize`, and
//! the `Mcp-Session-Id` header the server hands out is echoed afterwards.
//!
//! Tools are advertised to the model as `{prefix}_{tool}` where the prefix is
//! derived from the plugin name. When a server cannot list its tools, a single
//! generic `mcp_{plugin_id}` tool taking `{tool, arguments}` stands in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chatforge_config::McpPluginConfig;
use chatforge_core::error::{ChatError, ErrorKind};
use chatforge_core::request::ToolDeclaration;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "mcp-session-id";

/// Results larger than this are replaced by a preview.
pub const MAX_RESULT_SIZE: usize = 1024 * 1024;
const PREVIEW_CHARS: usize = 1000;

/// Prefix for a plugin's tool names: whitespace runs become `_`, then the
/// first eight characters, lowercased.
pub fn tool_prefix(plugin_name: &str) -> String {
    let mut joined = String::new();
    let mut in_space = false;
    for c in plugin_name.chars() {
        if c.is_whitespace() {
            if !in_space {
                joined.push('_');
            }
            in_space = true;
        } else {
            joined.push(c);
            in_space = false;
        }
    }
    joined.chars().take(8).collect::<String>().to_lowercase()
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct RemoteTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    input_schema: Option<Value>,
}

/// Where a function name the model called lands.
struct Route<'a> {
    plugin: &'a McpPluginConfig,
    /// `None` for the generic `mcp_{id}` tool, which names it in its arguments
    tool: Option<String>,
}

fn mcp_error(message: impl Into<String>) -> ChatError {
    ChatError::new(ErrorKind::ToolExecutionFailed, message)
}

/// An open JSON-RPC session with one server.
struct Session<'a> {
    client: &'a McpClient,
    plugin: &'a McpPluginConfig,
    session_id: Option<String>,
}

impl<'a> Session<'a> {
    async fn open(client: &'a McpClient, plugin: &'a McpPluginConfig) -> Result<Self, ChatError> {
        let mut session = Self {
            client,
            plugin,
            session_id: None,
        };
        session
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "clientInfo": { "name": "chatforge", "version": env!("CARGO_PKG_VERSION") }
                }),
            )
            .await?;
        session.notify("notifications/initialized").await;
        Ok(session)
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .http
            .post(&self.plugin.server_url)
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        if let Some(key) = &self.plugin.api_key {
            request = request.bearer_auth(key);
        }
        for (name, value) in &self.plugin.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(id) = &self.session_id {
            request = request.header(SESSION_HEADER, id.as_str());
        }
        request
    }

    async fn notify(&self, method: &str) {
        let body = json!({ "jsonrpc": "2.0", "method": method });
        if let Err(e) = self.post(&body).send().await {
            debug!(plugin = %self.plugin.name, method, error = %e, "MCP notification failed");
        }
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, ChatError> {
        let id = self.client.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let response = self
            .post(&body)
            .send()
            .await
            .map_err(|e| mcp_error(format!("MCP request to {} failed: {e}", self.plugin.name)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(mcp_error(format!("MCP server returned {status}: {text}")));
        }
        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session_id.to_string());
        }
        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = response
            .text()
            .await
            .map_err(|e| mcp_error(format!("MCP response unreadable: {e}")))?;

        let rpc = if is_sse {
            parse_sse_response(&text)?
        } else {
            serde_json::from_str::<RpcResponse>(&text)
                .map_err(|e| mcp_error(format!("MCP response is not JSON-RPC: {e}")))?
        };
        if let Some(err) = rpc.error {
            return Err(mcp_error(format!("{} (code {})", err.message, err.code)));
        }
        Ok(rpc.result.unwrap_or(Value::Null))
    }
}

/// First `data:` payload in an SSE body that is a JSON-RPC response.
fn parse_sse_response(body: &str) -> Result<RpcResponse, ChatError> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
        .find(|v| v.get("result").is_some() || v.get("error").is_some())
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| mcp_error("MCP stream carried no response"))
}

/// Render a `tools/call` result: text items joined by newlines, otherwise the
/// raw result.
fn render_result(result: &Value) -> String {
    if let Some(items) = result.get("content").and_then(Value::as_array) {
        let texts: Vec<&str> = items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
    }
    result.to_string()
}

fn cap_result(rendered: String) -> String {
    if rendered.len() <= MAX_RESULT_SIZE {
        return rendered;
    }
    let preview: String = rendered.chars().take(PREVIEW_CHARS).collect();
    json!({
        "error": "Result too large",
        "truncated": true,
        "original_size": rendered.len(),
        "preview": format!("{preview}..."),
    })
    .to_string()
}

/// Client for every enabled MCP plugin.
pub struct McpClient {
    http: reqwest::Client,
    plugins: Vec<McpPluginConfig>,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(plugins: Vec<McpPluginConfig>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            plugins: plugins.into_iter().filter(|p| p.enabled).collect(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn route(&self, function_name: &str) -> Option<Route<'_>> {
        if let Some(rest) = function_name.strip_prefix("mcp_") {
            // Plugin ids may not contain `_`; anything after the first one is the tool
            let (id, tool) = match rest.split_once('_') {
                Some((id, tool)) => (id, Some(tool.to_string())),
                None => (rest, None),
            };
            if let Some(plugin) = self.plugins.iter().find(|p| p.id == id) {
                return Some(Route { plugin, tool });
            }
        }
        self.plugins.iter().find_map(|plugin| {
            let prefix = format!("{}_", tool_prefix(&plugin.name));
            function_name.strip_prefix(&prefix).map(|tool| Route {
                plugin,
                tool: Some(tool.to_string()),
            })
        })
    }

    /// Whether `function_name` belongs to one of the plugins.
    pub fn handles(&self, function_name: &str) -> bool {
        self.route(function_name).is_some()
    }

    /// Declarations for every plugin's tools. Plugins whose listing fails
    /// contribute the generic fallback tool instead.
    pub async fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut declarations = Vec::new();
        for plugin in &self.plugins {
            match self.list_tools(plugin).await {
                Ok(tools) if !tools.is_empty() => {
                    info!(plugin = %plugin.name, count = tools.len(), "Got MCP tools");
                    let prefix = tool_prefix(&plugin.name);
                    declarations.extend(tools.into_iter().map(|tool| {
                        let description = tool
                            .description
                            .filter(|d| !d.is_empty())
                            .unwrap_or_else(|| format!("Call the {} tool", tool.name));
                        ToolDeclaration::Function {
                            name: format!("{prefix}_{}", tool.name),
                            description: format!("[{}] {description}", plugin.name),
                            parameters: tool.input_schema.unwrap_or_else(|| {
                                json!({"type": "object", "properties": {}, "required": []})
                            }),
                        }
                    }));
                }
                Ok(_) => declarations.push(fallback_declaration(plugin)),
                Err(e) => {
                    warn!(plugin = %plugin.name, error = %e, "Failed to list MCP tools, using fallback");
                    declarations.push(fallback_declaration(plugin));
                }
            }
        }
        declarations
    }

    async fn list_tools(&self, plugin: &McpPluginConfig) -> Result<Vec<RemoteTool>, ChatError> {
        let mut session = Session::open(self, plugin).await?;
        let result = session.request("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(tools).map_err(|e| mcp_error(format!("bad tools/list payload: {e}")))
    }

    /// Call a plugin tool. The returned string is the content handed back to
    /// the model; failures come back as a JSON `error` object.
    pub async fn call(&self, function_name: &str, arguments: Value) -> String {
        let Some(route) = self.route(function_name) else {
            warn!(function_name, "MCP plugin not found");
            return json!({"error": format!("Plugin not found for function: {function_name}")})
                .to_string();
        };

        let (tool, arguments) = match route.tool {
            Some(tool) => (tool, arguments),
            None => {
                let tool = arguments
                    .get("tool")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let inner = arguments
                    .get("arguments")
                    .filter(|a| a.is_object())
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                (tool, inner)
            }
        };

        info!(plugin = %route.plugin.name, tool = %tool, "Calling MCP tool");
        let outcome = async {
            let mut session = Session::open(self, route.plugin).await?;
            session
                .request("tools/call", json!({ "name": tool, "arguments": arguments }))
                .await
        }
        .await;

        match outcome {
            Ok(result) => cap_result(render_result(&result)),
            Err(e) => {
                warn!(plugin = %route.plugin.name, tool = %tool, error = %e, "MCP tool call failed");
                json!({"error": format!("MCP tool call failed: {}", e.message)}).to_string()
            }
        }
    }
}

fn fallback_declaration(plugin: &McpPluginConfig) -> ToolDeclaration {
    ToolDeclaration::Function {
        name: format!("mcp_{}", plugin.id),
        description: format!("Call the {} MCP plugin", plugin.name),
        parameters: json!({
            "type": "object",
            "properties": {
                "tool": { "type": "string", "description": "Name of the tool to call" },
                "arguments": { "type": "object", "description": "Tool arguments" }
            },
            "required": ["tool", "arguments"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, header};
    use axum::response::{IntoResponse, Response};
    use axum::{Json, Router, routing::post};
    use std::collections::HashMap;

    fn plugin(id: &str, name: &str, url: &str) -> McpPluginConfig {
        McpPluginConfig {
            id: id.into(),
            name: name.into(),
            server_url: url.into(),
            enabled: true,
            api_key: Some("mcp-key".into()),
            headers: HashMap::new(),
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/mcp")
    }

    async fn handler(headers: HeaderMap, Json(body): Json<Value>) -> Response {
        assert_eq!(headers["authorization"], "Bearer mcp-key");
        let id = body["id"].clone();
        match body["method"].as_str().unwrap_or_default() {
            "initialize" => {
                let mut response = Json(json!({"jsonrpc": "2.0", "id": id, "result": {}})).into_response();
                response
                    .headers_mut()
                    .insert(SESSION_HEADER, HeaderValue::from_static("sess-1"));
                response
            }
            "notifications/initialized" => axum::http::StatusCode::ACCEPTED.into_response(),
            "tools/list" => {
                assert_eq!(headers[SESSION_HEADER], "sess-1");
                Json(json!({"jsonrpc": "2.0", "id": id, "result": {"tools": [
                    {"name": "get_weather", "description": "Weather by city",
                     "inputSchema": {"type": "object", "properties": {"city": {"type": "string"}}}}
                ]}}))
                .into_response()
            }
            "tools/call" => {
                let city = body["params"]["arguments"]["city"].as_str().unwrap_or("?").to_string();
                let payload = json!({"jsonrpc": "2.0", "id": id, "result": {"content": [
                    {"type": "text", "text": format!("Sunny in {city}")},
                    {"type": "text", "text": "22C"}
                ]}});
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    format!("event: message\ndata: {payload}\n\n"),
                )
                    .into_response()
            }
            _ => Json(json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}}))
                .into_response(),
        }
    }

    #[test]
    fn prefix_from_plugin_name() {
        assert_eq!(tool_prefix("Weather  Service Pro"), "weather_");
        assert_eq!(tool_prefix("Maps"), "maps");
        assert_eq!(tool_prefix("AMap Tools"), "amap_too");
    }

    #[test]
    fn routing_by_prefix_and_generic_name() {
        let client = McpClient::new(
            vec![plugin("p1", "Maps", "http://x"), plugin("p2", "Weather", "http://y")],
            Duration::from_secs(5),
        );
        let route = client.route("weather_get_weather").unwrap();
        assert_eq!(route.plugin.id, "p2");
        assert_eq!(route.tool.as_deref(), Some("get_weather"));

        let generic = client.route("mcp_p1").unwrap();
        assert_eq!(generic.plugin.id, "p1");
        assert!(generic.tool.is_none());

        assert!(!client.handles("web_search"));
    }

    #[test]
    fn disabled_plugins_are_ignored() {
        let mut off = plugin("p1", "Maps", "http://x");
        off.enabled = false;
        let client = McpClient::new(vec![off], Duration::from_secs(5));
        assert!(client.is_empty());
        assert!(!client.handles("maps_route"));
    }

    #[test]
    fn large_results_are_replaced() {
        let huge = "x".repeat(MAX_RESULT_SIZE + 1);
        let capped: Value = serde_json::from_str(&cap_result(huge)).unwrap();
        assert_eq!(capped["truncated"], true);
        assert_eq!(capped["preview"].as_str().unwrap().len(), PREVIEW_CHARS + 3);
    }

    #[tokio::test]
    async fn lists_and_calls_tools() {
        let url = serve(Router::new().route("/mcp", post(handler))).await;
        let client = McpClient::new(vec![plugin("p1", "Weather", &url)], Duration::from_secs(5));

        let declarations = client.declarations().await;
        assert_eq!(declarations.len(), 1);
        match &declarations[0] {
            ToolDeclaration::Function { name, description, parameters } => {
                assert_eq!(name, "weather_get_weather");
                assert_eq!(description, "[Weather] Weather by city");
                assert!(parameters["properties"]["city"].is_object());
            }
            other => panic!("unexpected {other:?}"),
        }

        let out = client
            .call("weather_get_weather", json!({"city": "Oslo"}))
            .await;
        assert_eq!(out, "Sunny in Oslo\n22C");
    }

    #[tokio::test]
    async fn unreachable_server_falls_back_and_reports() {
        let client = McpClient::new(
            vec![plugin("p9", "Broken", "http://127.0.0.1:9/mcp")],
            Duration::from_secs(2),
        );
        let declarations = client.declarations().await;
        assert_eq!(declarations[0].name(), "mcp_p9");

        let out: Value =
            serde_json::from_str(&client.call("mcp_p9", json!({"tool": "x", "arguments": {}})).await)
                .unwrap();
        assert!(out["error"].as_str().unwrap().starts_with("MCP tool call failed"));
    }
}
