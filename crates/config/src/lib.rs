//! Configuration loading, validation, and management for chatforge.
//!
//! Loads configuration from `~/.chatforge/config.toml` with environment
//! variable overrides. Validates all settings at startup. Decrypted provider
//! secrets arrive here already in plain form; this crate never persists them.

use chatforge_core::request::ReasoningMode;
use chatforge_core::skill::Skill;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.chatforge/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider used when a request names none
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used when a request names none
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Provider configurations keyed by provider id
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub context_limit: ContextLimitConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub post_processing: PostProcessingConfig,

    #[serde(default)]
    pub turn: TurnConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Remote MCP servers whose tools are offered to the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_plugins: Vec<McpPluginConfig>,

    /// User-defined skills, injected when their keywords trigger
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<Skill>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

// ── Providers ─────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Adapter family; defaults to the provider id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Declared models with their capabilities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelConfig>,

    /// Model used for connectivity checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_model: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: None,
            enabled: true,
            api_key: None,
            base_url: None,
            models: Vec::new(),
            check_model: None,
        }
    }
}

impl ProviderConfig {
    /// The adapter family this provider speaks.
    pub fn kind_or<'a>(&'a self, provider_id: &'a str) -> &'a str {
        self.kind.as_deref().unwrap_or(provider_id)
    }

    pub fn model(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == model_id)
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("enabled", &self.enabled)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("models", &self.models)
            .field("check_model", &self.check_model)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Native reasoning control, if the model has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningCapability>,

    /// Provider-executed tools this model accepts (`web_search`,
    /// `google_search`, `code_execution`, ...)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub builtin_tools: Vec<String>,
}

/// Which reasoning controls a model supports and how they map onto its wire
/// request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningCapability {
    /// In preference order; the first entry is the fallback mode
    pub supported_modes: Vec<ReasoningMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive: Option<ChoiceControl>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<ChoiceControl>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetControl>,
}

/// An enumerated control (adaptive switch or effort level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceControl {
    /// Dot path into the wire request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<String>,
    pub options: Vec<String>,
    pub default: String,
    /// Extra parameters required to switch the feature on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_params: Option<serde_json::Value>,
}

/// A numeric token budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetControl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<String>,
    pub min: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,
    pub default: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_params: Option<serde_json::Value>,
}

// ── Context limiting ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextLimitConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Summarize overflow instead of dropping it
    #[serde(default)]
    pub compress: bool,

    /// `provider:model` used for summaries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress_model: Option<String>,
}

fn default_max_messages() -> usize {
    10
}

impl Default for ContextLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_messages: default_max_messages(),
            compress: false,
            compress_model: None,
        }
    }
}

// ── Memory ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Token budget for injected memories
    #[serde(default = "default_memory_tokens")]
    pub max_context_tokens: usize,

    /// Candidates fetched before the token budget is applied
    #[serde(default = "default_memory_candidates")]
    pub candidate_limit: usize,

    /// `provider:model` used for extraction; default selection when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_model: Option<String>,

    /// Extract from the whole transcript instead of the last pair
    #[serde(default)]
    pub legacy_extraction: bool,

    /// Report extracted memories back in the post-processing result
    #[serde(default)]
    pub notify_on_update: bool,
}

fn default_memory_tokens() -> usize {
    2000
}
fn default_memory_candidates() -> usize {
    20
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_context_tokens: default_memory_tokens(),
            candidate_limit: default_memory_candidates(),
            extraction_model: None,
            legacy_extraction: false,
            notify_on_update: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

fn default_top_k() -> usize {
    5
}
fn default_similarity_threshold() -> f32 {
    0.3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

// ── Web search ────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_search_provider")]
    pub active_provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_search_results")]
    pub max_results: usize,

    #[serde(default = "default_search_depth")]
    pub search_depth: String,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

fn default_search_provider() -> String {
    "tavily".into()
}
fn default_search_results() -> usize {
    5
}
fn default_search_depth() -> String {
    "basic".into()
}
fn default_search_timeout() -> u64 {
    15
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            active_provider: default_search_provider(),
            api_key: None,
            endpoint: None,
            max_results: default_search_results(),
            search_depth: default_search_depth(),
            timeout_secs: default_search_timeout(),
        }
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("enabled", &self.enabled)
            .field("active_provider", &self.active_provider)
            .field("api_key", &redact(&self.api_key))
            .field("endpoint", &self.endpoint)
            .field("max_results", &self.max_results)
            .field("search_depth", &self.search_depth)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── MCP plugins ───────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct McpPluginConfig {
    pub id: String,

    pub name: String,

    /// JSON-RPC endpoint of the server
    pub server_url: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sent as a bearer token when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Extra headers sent with every request
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl std::fmt::Debug for McpPluginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpPluginConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("server_url", &self.server_url)
            .field("enabled", &self.enabled)
            .field("api_key", &redact(&self.api_key))
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── Post-processing ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessingConfig {
    #[serde(default = "default_true")]
    pub auto_rename: bool,

    /// `provider:model` used for titles; default selection when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_rename_model: Option<String>,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_queue_capacity() -> usize {
    64
}
fn default_workers() -> usize {
    2
}

impl Default for PostProcessingConfig {
    fn default() -> Self {
        Self {
            auto_rename: true,
            auto_rename_model: None,
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
        }
    }
}

// ── Turn limits ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Tool-call rounds allowed before the turn fails as internal
    #[serde(default = "default_tool_rounds")]
    pub max_tool_rounds: usize,

    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Per-attachment cap on extracted text
    #[serde(default = "default_attachment_chars")]
    pub attachment_max_chars: usize,
}

fn default_tool_rounds() -> usize {
    8
}
fn default_upstream_timeout() -> u64 {
    120
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_attachment_chars() -> usize {
    20_000
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_tool_rounds(),
            upstream_timeout_secs: default_upstream_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            attachment_max_chars: default_attachment_chars(),
        }
    }
}

// ── Gateway ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Allowed CORS origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    8787
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origins: Vec::new(),
        }
    }
}

/// Split a `provider:model` reference. Model ids may themselves contain
/// colons (`ollama:llama3:8b`), so only the first colon separates.
pub fn split_model_ref(reference: &str) -> Option<(&str, &str)> {
    let (provider, model) = reference.trim().split_once(':')?;
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider, model))
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatforge/config.toml).
    ///
    /// Environment overrides:
    /// - `CHATFORGE_PROVIDER` / `CHATFORGE_MODEL` replace the defaults
    /// - `CHATFORGE_API_KEY` fills the default provider's key when unset
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(provider) = std::env::var("CHATFORGE_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("CHATFORGE_MODEL") {
            config.default_model = model;
        }

        if let Ok(key) = std::env::var("CHATFORGE_API_KEY") {
            let entry = config
                .providers
                .entry(config.default_provider.clone())
                .or_default();
            if entry.api_key.is_none() {
                entry.api_key = Some(key);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatforge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.turn.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "turn.max_tool_rounds must be at least 1".into(),
            ));
        }

        if self.turn.upstream_timeout_secs == 0 || self.turn.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "turn timeouts must be greater than 0".into(),
            ));
        }

        if self.context_limit.enabled && self.context_limit.max_messages == 0 {
            return Err(ConfigError::ValidationError(
                "context_limit.max_messages must be at least 1".into(),
            ));
        }

        if self.post_processing.workers == 0 || self.post_processing.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "post_processing.workers and queue_capacity must be at least 1".into(),
            ));
        }

        let model_refs = [
            ("context_limit.compress_model", &self.context_limit.compress_model),
            ("memory.extraction_model", &self.memory.extraction_model),
            ("post_processing.auto_rename_model", &self.post_processing.auto_rename_model),
        ];
        for (field, value) in model_refs {
            if let Some(reference) = value
                && !reference.trim().is_empty()
                && split_model_ref(reference).is_none()
            {
                return Err(ConfigError::ValidationError(format!(
                    "{field} must be in 'provider:model' form, got '{reference}'"
                )));
            }
        }

        for (id, provider) in &self.providers {
            for model in &provider.models {
                if let Some(reasoning) = &model.reasoning
                    && reasoning.supported_modes.is_empty()
                {
                    return Err(ConfigError::ValidationError(format!(
                        "providers.{id}.models.{}: reasoning.supported_modes is empty",
                        model.id
                    )));
                }
                if let Some(budget) = model.reasoning.as_ref().and_then(|r| r.budget.as_ref())
                    && budget.max.is_some_and(|max| max < budget.min)
                {
                    return Err(ConfigError::ValidationError(format!(
                        "providers.{id}.models.{}: reasoning.budget.max is below min",
                        model.id
                    )));
                }
            }
        }

        for plugin in &self.mcp_plugins {
            if !plugin.server_url.starts_with("http://") && !plugin.server_url.starts_with("https://")
            {
                return Err(ConfigError::ValidationError(format!(
                    "mcp_plugins.{}: server_url must be an http(s) URL",
                    plugin.id
                )));
            }
        }

        Ok(())
    }

    /// An enabled provider by id.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id).filter(|p| p.enabled)
    }

    /// Declared capabilities for `model` on `provider`, if any.
    pub fn model_config(&self, provider: &str, model: &str) -> Option<&ModelConfig> {
        self.provider(provider).and_then(|p| p.model(model))
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_model: default_model(),
            providers: HashMap::new(),
            context_limit: ContextLimitConfig::default(),
            memory: MemoryConfig::default(),
            retrieval: RetrievalConfig::default(),
            search: SearchConfig::default(),
            post_processing: PostProcessingConfig::default(),
            turn: TurnConfig::default(),
            gateway: GatewayConfig::default(),
            mcp_plugins: Vec::new(),
            skills: Vec::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
