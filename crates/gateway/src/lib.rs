//! HTTP API gateway for chatforge.
//!
//! Exposes the turn pipeline over HTTP:
//! - `GET  /health`
//! - `POST /api/chat`                    (NDJSON stream of `{c}` / `{r}` / `{e}` lines)
//! - `GET  /api/providers/{id}/models`
//! - `POST /api/providers/{id}/check`
//! - `GET  /api/sessions/{id}/messages`  (active branch)
//!
//! Built on Axum.

pub mod api;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use chatforge_config::AppConfig;
use chatforge_core::completion::Completer;
use chatforge_core::error::ChatError;
use chatforge_core::event::EventBus;
use chatforge_engine::{
    AdapterCompleter, ContextAssembler, PostProcessingQueue, PostProcessor, TaskOrchestrator,
    TurnController,
};
use chatforge_memory::{
    InMemoryMemoryStore, InMemoryStorage, InMemoryVectorStore, LocalFileExtractor,
};
use chatforge_providers::{HttpTransport, Transport, build_from_config};
use chatforge_tools::{ExternalSearch, McpClient, ToolExecutor, ToolRegistry, WebSearchTool};

/// Header carrying the caller's user id. Requests without it act as `local`.
pub const USER_HEADER: &str = "x-user-id";

/// Everything a request handler needs, built once per process.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub controller: Arc<TurnController>,
    pub events: Arc<EventBus>,
}

impl AppState {
    /// Wire the pipeline against the real HTTP transport.
    pub fn from_config(config: AppConfig) -> Result<Self, ChatError> {
        let transport = HttpTransport::new(Duration::from_secs(config.turn.upstream_timeout_secs))?;
        Ok(Self::with_transport(Arc::new(config), Arc::new(transport)))
    }

    /// Wire the pipeline with in-memory stores and the given transport.
    pub fn with_transport(config: Arc<AppConfig>, transport: Arc<dyn Transport>) -> Self {
        let events = Arc::new(EventBus::default());
        let registry = build_from_config(&config, transport);
        let completer: Arc<dyn Completer> = Arc::new(AdapterCompleter::new(registry.clone()));

        let storage = Arc::new(InMemoryStorage::new());
        let memory = Arc::new(InMemoryMemoryStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new(
            config.retrieval.similarity_threshold,
        ));
        let files = Arc::new(LocalFileExtractor::new(AppConfig::config_dir().join("files")));

        let mut orchestrator = TaskOrchestrator::new(storage.clone(), files, &config)
            .with_memory(memory.clone())
            .with_vectors(vectors);

        let tool_timeout = Duration::from_secs(config.turn.tool_timeout_secs);
        let mut tools = ToolRegistry::new();
        let search = Arc::new(ExternalSearch::new(config.search.clone()));
        if search.is_configured() {
            orchestrator = orchestrator.with_search(search.clone());
            tools.register(Arc::new(WebSearchTool::new(search)));
        }
        let mut executor = ToolExecutor::new(tools, tool_timeout).with_events(events.clone());
        let mcp = McpClient::new(config.mcp_plugins.clone(), tool_timeout);
        if !mcp.is_empty() {
            executor = executor.with_mcp(Arc::new(mcp));
        }

        let processor = PostProcessor::new(completer.clone(), storage.clone(), config.clone())
            .with_memory(memory)
            .with_events(events.clone());
        // Workers run detached for the lifetime of the runtime
        let (queue, _workers) = PostProcessingQueue::spawn(
            Arc::new(processor),
            config.post_processing.queue_capacity,
            config.post_processing.workers,
        );

        let assembler = ContextAssembler::new(config.context_limit.clone()).with_completer(completer);
        let controller = TurnController::new(
            registry,
            Arc::new(orchestrator),
            Arc::new(assembler),
            Arc::new(executor),
            storage,
            config.clone(),
        )
        .with_events(events.clone())
        .with_post_processing(queue);

        Self {
            config,
            controller: Arc::new(controller),
            events,
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(USER_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.gateway.cors_origins);

    Router::new()
        .route("/health", get(api::health))
        .route("/api/chat", post(api::chat))
        .route("/api/providers/{id}/models", get(api::list_models))
        .route("/api/providers/{id}/check", post(api::check_provider))
        .route("/api/sessions/{id}/messages", get(api::session_messages))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server and run until Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = AppState::from_config(config)?;
    let providers = state.controller.registry().list().join(", ");
    let app = build_router(state);

    info!(addr = %addr, providers = %providers, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
