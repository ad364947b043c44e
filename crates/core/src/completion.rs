//! One-shot completion collaborator used by compression, title generation
//! and memory extraction.

use async_trait::async_trait;

use crate::error::ChatError;
use crate::message::Message;
use crate::request::SamplingParams;

#[async_trait]
pub trait Completer: Send + Sync {
    /// Run a non-tool, non-reasoning completion and return the full text.
    async fn complete(
        &self,
        provider: &str,
        model: &str,
        messages: Vec<Message>,
        sampling: SamplingParams,
    ) -> Result<String, ChatError>;
}
