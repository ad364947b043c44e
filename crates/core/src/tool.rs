//! Tool trait: the abstraction over callable tools.
//!
//! Tool calls are emitted by the model mid-stream, resolved by the tool
//! executor and fed back as tool-result messages before generation resumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::request::ToolDeclaration;

/// A tool call emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id assigned by the provider (or synthesized when absent)
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON string, exactly as streamed
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the argument string. An empty string is treated as `{}`.
    pub fn parsed_arguments(&self) -> Result<serde_json::Value, ToolError> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("{}: {e}", self.name)))
    }
}

/// The result handed back to the model for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub tool_call_id: String,
    pub name: String,
}

/// Per-turn execution context: which provider the turn runs against.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ToolContext {
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    /// Caller-supplied tool options
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("settings", &self.settings)
            .finish()
    }
}

/// A locally executed tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name the model calls this tool by.
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool and return the text handed back to the model.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError>;

    /// Convert this tool into a declaration for the outgoing request.
    fn to_declaration(&self) -> ToolDeclaration {
        ToolDeclaration::Function {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_arguments_parse_as_object() {
        let call = ToolCall::new("c1", "web_search", "");
        assert!(call.parsed_arguments().unwrap().is_object());
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let call = ToolCall::new("c1", "web_search", "{\"query\":");
        let err = call.parsed_arguments().unwrap_err();
        assert!(err.to_string().contains("web_search"));
    }

    #[test]
    fn context_debug_redacts_key() {
        let ctx = ToolContext {
            provider: "moonshot".into(),
            api_key: "sk-secret".into(),
            ..Default::default()
        };
        let dbg = format!("{ctx:?}");
        assert!(!dbg.contains("sk-secret"));
    }
}
