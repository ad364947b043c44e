//! Tool execution for chatforge.
//!
//! Tool calls emitted mid-stream are resolved here and handed back as
//! tool-result content:
//! - provider-hosted "formula" tools, executed over HTTP
//! - tools exposed by remote MCP servers
//! - the generic `web_search` tool, backed by an external search service
//! - provider builtins (`$`-prefixed), echoed back for the provider to run
//!
//! Unknown tools and failures never abort a turn; they come back as a JSON
//! error payload the model can react to.

pub mod executor;
pub mod formula;
pub mod mcp;
pub mod registry;
pub mod search;
pub mod web_search;

pub use executor::ToolExecutor;
pub use formula::FormulaClient;
pub use mcp::McpClient;
pub use registry::ToolRegistry;
pub use search::{ExternalSearch, SearchBackend, SearchHit};
pub use web_search::WebSearchTool;
