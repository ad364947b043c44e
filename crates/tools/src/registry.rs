//! Locally executed tools, keyed by the name the model calls them by.

use std::collections::HashMap;
use std::sync::Arc;

use chatforge_core::request::ToolDeclaration;
use chatforge_core::tool::Tool;

/// A registry of available tools.
///
/// The executor uses this to:
/// 1. Get declarations to advertise to the model
/// 2. Look up a tool when the model calls it
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Declarations for every registered tool, sorted by name.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut declarations: Vec<ToolDeclaration> =
            self.tools.values().map(|t| t.to_declaration()).collect();
        declarations.sort_by(|a, b| a.name().cmp(b.name()));
        declarations
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatforge_core::error::ToolError;
    use chatforge_core::tool::ToolContext;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<String, ToolError> {
            Ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(EchoTool));

        let tool = registry.get("echo").unwrap();
        let out = tool
            .execute(serde_json::json!({"text": "hi"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, "hi");
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn declarations_carry_schema() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let declarations = registry.declarations();
        assert_eq!(declarations.len(), 1);
        match &declarations[0] {
            ToolDeclaration::Function { name, parameters, .. } => {
                assert_eq!(name, "echo");
                assert_eq!(parameters["required"][0], "text");
            }
            other => panic!("unexpected declaration {other:?}"),
        }
    }
}
