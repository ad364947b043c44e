//! Resolves model-emitted tool calls into tool-result content.
//!
//! Dispatch order for one call:
//! 1. provider-hosted formula tools, when the turn runs against Moonshot
//! 2. `$`-prefixed provider builtins, echoed back verbatim
//! 3. locally registered tools (`web_search`)
//! 4. MCP plugin tools
//!
//! Anything else, malformed arguments and timeouts come back as a JSON
//! `error` payload. A call never fails the turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chatforge_core::event::{DomainEvent, EventBus};
use chatforge_core::tool::{ToolCall, ToolContext, ToolOutput};
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::formula::{FormulaClient, formula_uri};
use crate::mcp::McpClient;
use crate::registry::ToolRegistry;

const FORMULA_PROVIDER: &str = "moonshot";

pub struct ToolExecutor {
    registry: ToolRegistry,
    formula: FormulaClient,
    mcp: Option<Arc<McpClient>>,
    timeout: Duration,
    events: Option<Arc<EventBus>>,
}

fn error_content(message: impl Into<String>) -> String {
    json!({ "error": message.into() }).to_string()
}

fn is_error_content(content: &str) -> bool {
    content.starts_with("Error:")
        || serde_json::from_str::<serde_json::Value>(content)
            .ok()
            .is_some_and(|v| v.get("error").is_some())
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry,
            formula: FormulaClient::new(timeout),
            mcp: None,
            timeout,
            events: None,
        }
    }

    pub fn with_mcp(mut self, mcp: Arc<McpClient>) -> Self {
        self.mcp = Some(mcp);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn formula(&self) -> &FormulaClient {
        &self.formula
    }

    pub fn mcp(&self) -> Option<&Arc<McpClient>> {
        self.mcp.as_ref()
    }

    /// Execute one call; the output always carries the call's id and name.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let started = Instant::now();
        let content = match tokio::time::timeout(self.timeout, self.dispatch(call, ctx)).await {
            Ok(content) => content,
            Err(_) => {
                warn!(tool = %call.name, timeout_secs = self.timeout.as_secs(), "Tool timed out");
                error_content(format!("Tool timed out after {}s", self.timeout.as_secs()))
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let success = !is_error_content(&content);
        info!(tool = %call.name, success, duration_ms, "Tool executed");
        if let Some(events) = &self.events {
            events.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success,
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
        }

        ToolOutput {
            content,
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
        }
    }

    /// Execute a round of calls concurrently. Outputs come back in the order
    /// the calls were emitted.
    pub async fn execute_all(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<ToolOutput> {
        join_all(calls.iter().map(|call| self.execute(call, ctx))).await
    }

    async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> String {
        let Ok(arguments) = call.parsed_arguments() else {
            warn!(tool = %call.name, "Tool arguments are not valid JSON");
            return error_content("Invalid arguments");
        };

        if ctx.provider == FORMULA_PROVIDER
            && !ctx.base_url.is_empty()
            && !ctx.api_key.is_empty()
            && let Some(uri) = formula_uri(&call.name)
        {
            return self
                .formula
                .call(&ctx.base_url, &ctx.api_key, uri, &call.name, &arguments)
                .await;
        }

        if call.name.starts_with('$') {
            debug!(tool = %call.name, "Builtin passthrough");
            return arguments.to_string();
        }

        if let Some(tool) = self.registry.get(&call.name) {
            return match tool.execute(arguments, ctx).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool failed");
                    error_content(e.to_string())
                }
            };
        }

        if let Some(mcp) = &self.mcp
            && mcp.handles(&call.name)
        {
            return mcp.call(&call.name, arguments).await;
        }

        warn!(tool = %call.name, "Tool not implemented");
        error_content("Tool not implemented")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatforge_core::error::ToolError;
    use chatforge_core::tool::Tool;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, arguments: serde_json::Value, _: &ToolContext) -> Result<String, ToolError> {
            let ms = arguments["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(format!("slept {ms}"))
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _: serde_json::Value, _: &ToolContext) -> Result<String, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "broken".into(),
                reason: "disk full".into(),
            })
        }
    }

    fn executor(timeout: Duration) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        registry.register(Arc::new(BrokenTool));
        ToolExecutor::new(registry, timeout)
    }

    fn error_of(output: &ToolOutput) -> String {
        let v: serde_json::Value = serde_json::from_str(&output.content).unwrap();
        v["error"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn unknown_and_malformed_calls_are_in_band() {
        let exec = executor(Duration::from_secs(5));
        let ctx = ToolContext::default();

        let out = exec.execute(&ToolCall::new("c1", "teleport", "{}"), &ctx).await;
        assert_eq!(error_of(&out), "Tool not implemented");
        assert_eq!(out.tool_call_id, "c1");

        let out = exec.execute(&ToolCall::new("c2", "slow", "{\"ms\":"), &ctx).await;
        assert_eq!(error_of(&out), "Invalid arguments");

        let out = exec.execute(&ToolCall::new("c3", "broken", "{}"), &ctx).await;
        assert!(error_of(&out).contains("disk full"));
    }

    #[tokio::test]
    async fn builtin_passthrough_echoes_arguments() {
        let exec = executor(Duration::from_secs(5));
        let out = exec
            .execute(
                &ToolCall::new("c1", "$web_search", r#"{"search_result":{"search_id":"s1"}}"#),
                &ToolContext::default(),
            )
            .await;
        let v: serde_json::Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(v["search_result"]["search_id"], "s1");
        assert_eq!(out.name, "$web_search");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_reported_in_band() {
        let exec = executor(Duration::from_secs(1));
        let out = exec
            .execute(&ToolCall::new("c1", "slow", r#"{"ms":5000}"#), &ToolContext::default())
            .await;
        assert_eq!(error_of(&out), "Tool timed out after 1s");
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_round_keeps_emission_order() {
        let exec = executor(Duration::from_secs(10));
        let calls = vec![
            ToolCall::new("a", "slow", r#"{"ms":300}"#),
            ToolCall::new("b", "slow", r#"{"ms":10}"#),
            ToolCall::new("c", "teleport", "{}"),
        ];
        let outputs = exec.execute_all(&calls, &ToolContext::default()).await;
        let ids: Vec<&str> = outputs.iter().map(|o| o.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(outputs[0].content, "slept 300");
        assert_eq!(outputs[1].content, "slept 10");
    }

    #[tokio::test]
    async fn publishes_tool_events() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let exec = executor(Duration::from_secs(5)).with_events(bus);

        exec.execute(&ToolCall::new("c1", "teleport", "{}"), &ToolContext::default())
            .await;
        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                assert_eq!(tool_name, "teleport");
                assert!(!success);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn error_detection() {
        assert!(is_error_content("Error: quota"));
        assert!(is_error_content(r#"{"error":"x"}"#));
        assert!(!is_error_content(r#"{"success":true}"#));
        assert!(!is_error_content("plain text"));
    }
}
