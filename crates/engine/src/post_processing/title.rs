//! Session title generation.

use chatforge_config::{AppConfig, split_model_ref};
use chatforge_core::completion::Completer;
use chatforge_core::error::ChatError;
use chatforge_core::message::Message;
use chatforge_core::request::SamplingParams;
use tracing::{debug, warn};

const TITLE_PROMPT: &str = "You are a helpful assistant that generates concise and descriptive titles for conversations. Please generate a title of 10-20 characters based on the user's input and the assistant's response. The title should be in the same language as the user's input. Do not include quotes or any other text, just the title.";

/// Characters of each side of the exchange shown to the title model.
const EXCERPT_CHARS: usize = 500;

fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((at, _)) => &text[..at],
        None => text,
    }
}

/// The `(provider, model)` used for titles.
///
/// `auto_rename_model` wins when its provider is enabled and lists the
/// model; otherwise the configured defaults are used.
pub fn title_model(config: &AppConfig) -> (String, String) {
    let fallback = (config.default_provider.clone(), config.default_model.clone());
    let Some(reference) = config
        .post_processing
        .auto_rename_model
        .as_deref()
        .filter(|r| !r.trim().is_empty())
    else {
        return fallback;
    };
    let Some((provider, model)) = split_model_ref(reference) else {
        warn!(reference, "Invalid title model reference, using default");
        return fallback;
    };
    match config.provider(provider) {
        Some(p) if p.model(model).is_some() => (provider.to_string(), model.to_string()),
        Some(_) => {
            warn!(provider, model, "Title model not listed by provider, using default");
            fallback
        }
        None => {
            warn!(provider, "Title provider not enabled, using default");
            fallback
        }
    }
}

/// Strip one leading and one trailing quote character.
fn strip_quotes(title: &str) -> &str {
    let title = title.strip_prefix(['"', '\'']).unwrap_or(title);
    title.strip_suffix(['"', '\'']).unwrap_or(title)
}

/// Ask `model` for a short title. `Ok(None)` when the model returned nothing
/// usable.
pub async fn generate_title(
    completer: &dyn Completer,
    provider: &str,
    model: &str,
    user_text: &str,
    assistant_text: &str,
) -> Result<Option<String>, ChatError> {
    let messages = vec![
        Message::system(TITLE_PROMPT),
        Message::user(format!(
            "User: {}\nAssistant: {}",
            excerpt(user_text),
            excerpt(assistant_text)
        )),
    ];
    let sampling = SamplingParams {
        temperature: Some(0.5),
        max_tokens: Some(50),
        ..Default::default()
    };

    let raw = completer.complete(provider, model, messages, sampling).await?;
    let title = strip_quotes(raw.trim()).trim();
    debug!(provider, model, title, "Title generated");
    Ok((!title.is_empty()).then(|| title.to_string()))
}
