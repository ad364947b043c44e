//! Usage normalization: provider-native token accounting into `StreamUsage`.

use chatforge_core::StreamUsage;
use serde_json::Value;

fn field(v: &Value, key: &str) -> Option<u64> {
    v.get(key).and_then(Value::as_u64)
}

/// Normalize any known usage shape.
///
/// Recognised shapes:
/// - chat-completions: `prompt_tokens` / `completion_tokens` / `total_tokens`
///   with `prompt_tokens_details.cached_tokens` and
///   `completion_tokens_details.reasoning_tokens`
/// - messages / responses: `input_tokens` / `output_tokens`, cache reads in
///   `cache_read_input_tokens` or `input_tokens_details.cached_tokens`
/// - generateContent: `promptTokenCount` / `candidatesTokenCount` /
///   `totalTokenCount`, `cachedContentTokenCount`, `thoughtsTokenCount`
pub fn normalize_usage(v: &Value) -> Option<StreamUsage> {
    if !v.is_object() {
        return None;
    }

    if v.get("prompt_tokens").is_some() || v.get("completion_tokens").is_some() {
        let prompt = field(v, "prompt_tokens").unwrap_or(0);
        let completion = field(v, "completion_tokens").unwrap_or(0);
        let mut usage = StreamUsage::new(
            prompt,
            completion,
            field(v, "total_tokens").unwrap_or(prompt + completion),
        );
        usage.cached_tokens = v
            .pointer("/prompt_tokens_details/cached_tokens")
            .and_then(Value::as_u64);
        usage.reasoning_tokens = v
            .pointer("/completion_tokens_details/reasoning_tokens")
            .and_then(Value::as_u64);
        return Some(usage);
    }

    if v.get("input_tokens").is_some() || v.get("output_tokens").is_some() {
        let input = field(v, "input_tokens").unwrap_or(0);
        let output = field(v, "output_tokens").unwrap_or(0);
        let mut usage = StreamUsage::new(
            input,
            output,
            field(v, "total_tokens").unwrap_or(input + output),
        );
        usage.cached_tokens = field(v, "cache_read_input_tokens").or_else(|| {
            v.pointer("/input_tokens_details/cached_tokens")
                .and_then(Value::as_u64)
        });
        usage.reasoning_tokens = v
            .pointer("/output_tokens_details/reasoning_tokens")
            .and_then(Value::as_u64);
        return Some(usage);
    }

    if v.get("promptTokenCount").is_some() || v.get("totalTokenCount").is_some() {
        let prompt = field(v, "promptTokenCount").unwrap_or(0);
        let completion = field(v, "candidatesTokenCount").unwrap_or(0);
        let mut usage = StreamUsage::new(
            prompt,
            completion,
            field(v, "totalTokenCount").unwrap_or(prompt + completion),
        );
        usage.cached_tokens = field(v, "cachedContentTokenCount");
        usage.reasoning_tokens = field(v, "thoughtsTokenCount");
        return Some(usage);
    }

    None
}
