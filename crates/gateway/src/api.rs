//! Route handlers.
//!
//! Errors leave as `{error, kind}` with the status of their [`ErrorKind`].
//! Once `/api/chat` has started streaming, failures arrive in-band as a final
//! `{"e": ...}` line instead.

use std::convert::Infallible;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use chatforge_core::error::{ChatError, ErrorKind};
use chatforge_core::message::Message;
use chatforge_core::stream::UnifiedStreamEvent;
use chatforge_engine::ChatRequest;
use chatforge_providers::{ConnectivityCheck, ModelInfo};

use crate::{AppState, USER_HEADER};

/// Buffered events between the turn task and the response body.
const STREAM_BUFFER: usize = 64;

// ── Errors ──────────────────────────────────────────────────────────────

/// A [`ChatError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: &self.0.message,
            kind: self.0.kind.as_str(),
        };
        (status, Json(body)).into_response()
    }
}

fn user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("local")
        .to_string()
}

// ── Health ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ── Chat ────────────────────────────────────────────────────────────────

/// One NDJSON line of the chat stream.
#[derive(Debug, Default, Serialize)]
struct StreamLine<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    c: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    e: Option<&'a str>,
}

/// The client-facing line for an event. Tool calls, usage and `done` are
/// internal to the turn and produce nothing.
fn ndjson_line(event: &UnifiedStreamEvent) -> Option<String> {
    let line = match event {
        UnifiedStreamEvent::ContentDelta { delta } => StreamLine {
            c: Some(delta),
            ..Default::default()
        },
        UnifiedStreamEvent::ReasoningDelta { delta } => StreamLine {
            r: Some(delta),
            ..Default::default()
        },
        UnifiedStreamEvent::Error { error } => StreamLine {
            e: Some(&error.message),
            ..Default::default()
        },
        _ => return None,
    };
    let mut encoded = serde_json::to_string(&line).ok()?;
    encoded.push('\n');
    Some(encoded)
}

/// `POST /api/chat`: run one turn and stream it back as NDJSON.
///
/// The request is validated before streaming starts. Dropping the response
/// body (client disconnect) cancels the turn.
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| ChatError::invalid_request(format!("Invalid JSON body: {e}")))?;
    let request = ChatRequest::parse(value)?;

    let provider = request
        .provider
        .as_deref()
        .unwrap_or(&state.config.default_provider);
    if !state.controller.registry().contains(provider) {
        return Err(ChatError::configuration_missing(format!(
            "Provider '{provider}' is not configured"
        ))
        .into());
    }

    let user = user_id(&headers);
    info!(user = %user, provider = %provider, session_id = ?request.session_id, "Chat request");

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let controller = state.controller.clone();
    tokio::spawn(async move {
        // The controller reports failures through the sink itself
        if let Err(e) = controller.run(&user, request, tx, cancel).await {
            debug!(kind = %e.kind, error = %e.message, "Turn ended with error");
        }
    });

    let lines = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        loop {
            let event = rx.recv().await?;
            if let Some(line) = ndjson_line(&event) {
                return Some((Ok::<_, Infallible>(line), (rx, guard)));
            }
        }
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

// ── Providers ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ModelsResponse {
    provider: String,
    models: Vec<ModelInfo>,
}

/// `GET /api/providers/{id}/models`
pub async fn list_models(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModelsResponse>, ApiError> {
    let handle = state.controller.registry().resolve(&id)?;
    let models = handle.list_models().await?;
    Ok(Json(ModelsResponse {
        provider: id,
        models,
    }))
}

/// `POST /api/providers/{id}/check`: failures are reported in the body.
pub async fn check_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectivityCheck>, ApiError> {
    let handle = state.controller.registry().resolve(&id)?;
    let check = handle.check().await;
    info!(provider = %id, success = check.success, "Connectivity check");
    Ok(Json(check))
}

// ── Sessions ────────────────────────────────────────────────────────────

/// `GET /api/sessions/{id}/messages`: the active branch, root first.
pub async fn session_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let storage = state.controller.storage();
    let user = user_id(&headers);

    let session = storage
        .session(&id)
        .await
        .map_err(ChatError::from)?
        .filter(|s| s.user_id == user)
        .ok_or_else(|| ChatError::new(ErrorKind::NotFound, format!("Session {id} not found")))?;

    let tree = storage.load_tree(&id).await.map_err(ChatError::from)?;
    let leaf = session
        .current_leaf_id
        .as_deref()
        .or_else(|| tree.latest_leaf());
    let branch = leaf
        .map(|leaf| tree.branch(leaf).into_iter().cloned().collect())
        .unwrap_or_default();
    Ok(Json(branch))
}
