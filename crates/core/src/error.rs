//! Error types for the chatforge domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Every failure that can
//! leave a turn is normalized into a [`ChatError`] carrying a closed
//! [`ErrorKind`]; bounded contexts keep their own small enums and convert.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed error taxonomy shared by adapters, tools and the turn pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    Unauthorized,
    NotFound,
    RateLimited,
    UpstreamTimeout,
    UpstreamServerError,
    /// Reported in-band to the model as tool content, never fatal.
    ToolExecutionFailed,
    ConfigurationMissing,
    Internal,
    /// The caller aborted the turn.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::UpstreamServerError => "upstream_server_error",
            ErrorKind::ToolExecutionFailed => "tool_execution_failed",
            ErrorKind::ConfigurationMissing => "configuration_missing",
            ErrorKind::Internal => "internal",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// HTTP status used when the error is returned to a client.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::RateLimited => 429,
            ErrorKind::UpstreamTimeout => 504,
            ErrorKind::UpstreamServerError => 502,
            ErrorKind::ConfigurationMissing => 503,
            ErrorKind::Cancelled => 499,
            ErrorKind::ToolExecutionFailed | ErrorKind::Internal => 500,
        }
    }

    /// Whether repeating the same upstream call could succeed.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::UpstreamTimeout | ErrorKind::UpstreamServerError
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized error.
///
/// `raw` keeps the original provider payload for diagnostics; it is never
/// interpreted after normalization.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ChatError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            status: None,
            provider: None,
            raw: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn configuration_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationMissing, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamTimeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "turn cancelled by caller")
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

/// Result type alias using our error.
pub type Result<T> = std::result::Result<T, ChatError>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

impl From<ToolError> for ChatError {
    fn from(err: ToolError) -> Self {
        ChatError::new(ErrorKind::ToolExecutionFailed, err.to_string())
    }
}

impl From<StorageError> for ChatError {
    fn from(err: StorageError) -> Self {
        let kind = match err {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Conflict(_) | StorageError::Backend(_) => ErrorKind::Internal,
        };
        ChatError::new(kind, err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::internal(format!("Serialization error: {err}"))
    }
}
