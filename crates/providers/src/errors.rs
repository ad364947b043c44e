//! Error normalization: provider-native error bodies, HTTP statuses and
//! transport failures into the closed `ErrorKind` taxonomy.
//!
//! The original provider payload always survives in `ChatError::raw`.

use chatforge_core::{ChatError, ErrorKind};
use serde_json::Value;

const FALLBACK_MESSAGE: &str = "Unknown error occurred";

/// Map a provider-native error code to the normalized code.
pub fn normalize_code(code: &str) -> Option<&'static str> {
    let normalized = match code {
        "invalid_api_key" | "authentication_error" | "UNAUTHENTICATED" => "INVALID_API_KEY",
        "insufficient_quota" => "INSUFFICIENT_QUOTA",
        "rate_limit_exceeded" | "rate_limit_error" | "RESOURCE_EXHAUSTED" => "RATE_LIMIT_EXCEEDED",
        "context_length_exceeded" => "CONTEXT_LENGTH_EXCEEDED",
        "invalid_request_error" | "INVALID_ARGUMENT" | "FAILED_PRECONDITION" => "INVALID_REQUEST",
        "permission_error" | "PERMISSION_DENIED" => "PERMISSION_DENIED",
        "not_found_error" | "model_not_found" | "NOT_FOUND" => "NOT_FOUND",
        "api_error" | "server_error" | "INTERNAL" => "API_ERROR",
        "overloaded_error" | "UNAVAILABLE" => "SERVER_OVERLOADED",
        "DEADLINE_EXCEEDED" => "GATEWAY_TIMEOUT",
        _ => return None,
    };
    Some(normalized)
}

/// Normalized code implied by a bare HTTP status.
pub fn code_for_status(status: u16) -> &'static str {
    match status {
        400 => "INVALID_REQUEST",
        401 => "INVALID_API_KEY",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RATE_LIMIT_EXCEEDED",
        500 => "SERVER_ERROR",
        502 => "BAD_GATEWAY",
        503 => "SERVICE_UNAVAILABLE",
        504 => "GATEWAY_TIMEOUT",
        _ => "UNKNOWN_ERROR",
    }
}

/// Taxonomy bucket for a normalized code.
pub fn kind_for_code(code: &str, status: Option<u16>) -> ErrorKind {
    match code {
        "INVALID_API_KEY" | "PERMISSION_DENIED" => ErrorKind::Unauthorized,
        "INSUFFICIENT_QUOTA" | "RATE_LIMIT_EXCEEDED" => ErrorKind::RateLimited,
        "CONTEXT_LENGTH_EXCEEDED" | "INVALID_REQUEST" => ErrorKind::InvalidRequest,
        "NOT_FOUND" => ErrorKind::NotFound,
        "GATEWAY_TIMEOUT" => ErrorKind::UpstreamTimeout,
        "API_ERROR" | "SERVER_OVERLOADED" | "SERVER_ERROR" | "BAD_GATEWAY"
        | "SERVICE_UNAVAILABLE" => ErrorKind::UpstreamServerError,
        _ => match status {
            Some(s) if (400..500).contains(&s) => ErrorKind::InvalidRequest,
            _ => ErrorKind::UpstreamServerError,
        },
    }
}

/// Pull the human-readable message out of an error body.
pub fn extract_message(body: &Value) -> String {
    let candidates = [
        body.pointer("/error/message"),
        body.pointer("/error/details/0/description"),
        body.get("message"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(String::from)
        .or_else(|| body.get("error").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| FALLBACK_MESSAGE.to_string())
}

fn native_code(body: &Value) -> Option<&str> {
    let error = body.get("error").unwrap_or(body);
    ["code", "status", "type"]
        .into_iter()
        .filter_map(|key| error.get(key).and_then(Value::as_str))
        .find(|code| normalize_code(code).is_some())
}

/// Normalize a structured provider error body.
pub fn normalize_error(provider: &str, status: Option<u16>, body: &Value) -> ChatError {
    let code = native_code(body)
        .and_then(normalize_code)
        .or_else(|| status.map(code_for_status))
        .unwrap_or("UNKNOWN_ERROR");

    let mut error = ChatError::new(kind_for_code(code, status), extract_message(body))
        .with_code(code)
        .with_provider(provider)
        .with_raw(body.clone());
    if let Some(status) = status {
        error = error.with_status(status);
    }
    error
}

/// Normalize a non-success HTTP response whose body may or may not be JSON.
pub fn normalize_http(provider: &str, status: u16, body: &str) -> ChatError {
    let parsed = serde_json::from_str::<Value>(body)
        .ok()
        .filter(Value::is_object)
        .unwrap_or_else(|| {
            let message = if body.trim().is_empty() {
                format!("HTTP {status}")
            } else {
                body.trim().to_string()
            };
            serde_json::json!({ "message": message })
        });
    normalize_error(provider, Some(status), &parsed)
}

/// Normalize a transport-level failure (connect, read, timeout).
pub fn normalize_transport(provider: &str, err: &reqwest::Error) -> ChatError {
    let kind = if err.is_timeout() {
        ErrorKind::UpstreamTimeout
    } else {
        ErrorKind::UpstreamServerError
    };
    let code = if err.is_timeout() {
        "GATEWAY_TIMEOUT"
    } else {
        "NETWORK_ERROR"
    };
    ChatError::new(kind, err.to_string())
        .with_code(code)
        .with_provider(provider)
}
