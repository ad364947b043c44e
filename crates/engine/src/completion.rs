//! One-shot completions through the adapter registry.

use async_trait::async_trait;
use chatforge_core::completion::Completer;
use chatforge_core::error::ChatError;
use chatforge_core::message::Message;
use chatforge_core::request::{SamplingParams, UnifiedChatRequest};
use chatforge_providers::AdapterRegistry;
use tracing::debug;

/// [`Completer`] that streams a request to completion and returns the text.
///
/// Used by compression, title generation and memory extraction.
#[derive(Clone)]
pub struct AdapterCompleter {
    registry: AdapterRegistry,
}

impl AdapterCompleter {
    pub fn new(registry: AdapterRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Completer for AdapterCompleter {
    async fn complete(
        &self,
        provider: &str,
        model: &str,
        messages: Vec<Message>,
        sampling: SamplingParams,
    ) -> Result<String, ChatError> {
        let handle = self.registry.resolve(provider)?;
        let request = UnifiedChatRequest {
            messages,
            model: model.to_string(),
            provider: provider.to_string(),
            sampling,
            ..Default::default()
        };
        let response = handle.complete(&request).await?;
        debug!(
            provider,
            model,
            total_tokens = response.usage.total_tokens,
            "One-shot completion finished"
        );
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatforge_core::ErrorKind;

    #[tokio::test]
    async fn unknown_provider_is_configuration_missing() {
        let completer = AdapterCompleter::new(AdapterRegistry::new());
        let err = completer
            .complete("nowhere", "m", vec![Message::user("hi")], SamplingParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigurationMissing);
    }
}
