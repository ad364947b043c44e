//! External web-search collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Output of one external search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchResult {
    /// JSON string persisted with the assistant message
    pub search_results: String,
    /// Context text prepended to the user's question
    pub search_prompt: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Run a search. `Ok(None)` means search is not configured or returned
    /// nothing usable.
    async fn search(&self, query: &str) -> Result<Option<WebSearchResult>, ChatError>;
}
