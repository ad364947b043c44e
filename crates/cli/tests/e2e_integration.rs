//! End-to-end tests for the chatforge stack.
//!
//! A local axum server plays an OpenAI-compatible upstream. Configuration is
//! loaded from a real TOML file, the pipeline runs over the real HTTP
//! transport, and requests enter through the gateway router.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use chatforge_config::AppConfig;
use chatforge_gateway::{AppState, build_router};

// ── Fake upstream ────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Upstream {
    bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<String>>>,
}

fn sse(frames: &[Value]) -> String {
    let mut body: String = frames.iter().map(|f| format!("data: {f}\n\n")).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn text_frames(text: &str) -> Vec<Value> {
    vec![
        json!({"choices": [{"delta": {"content": text}}]}),
        json!({"choices": [{"delta": {}, "finish_reason": "stop"}],
               "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}}),
    ]
}

/// Answers tool results, asks for `lookup` when the user mentions it, and
/// otherwise replies plainly.
async fn completions(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        upstream.auth.lock().unwrap().push(auth.to_string());
    }
    upstream.bodies.lock().unwrap().push(body.clone());

    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    let last_role = messages.last().and_then(|m| m["role"].as_str()).unwrap_or_default();
    let wants_lookup = messages
        .iter()
        .any(|m| m["role"] == "user" && m["content"].as_str().is_some_and(|c| c.contains("lookup")));

    let frames = if last_role == "tool" {
        text_frames("The answer is 42.")
    } else if wants_lookup {
        vec![json!({"choices": [{"delta": {"tool_calls": [{
            "index": 0, "id": "call_1", "type": "function",
            "function": {"name": "lookup", "arguments": "{\"key\":\"answer\"}"}
        }]}, "finish_reason": "tool_calls"}]})]
    } else {
        text_frames("Plain answer")
    };

    ([(header::CONTENT_TYPE, "text/event-stream")], sse(&frames))
}

async fn rate_limited() -> impl IntoResponse {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({"error": {"message": "Rate limit reached for requests", "type": "rate_limit_error", "code": "rate_limit_exceeded"}})),
    )
}

async fn models() -> Json<Value> {
    Json(json!({"object": "list", "data": [{"id": "gpt-4o"}, {"id": "gpt-4o-mini"}]}))
}

async fn spawn_upstream() -> (String, Upstream) {
    let upstream = Upstream::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .route("/v1/models", get(models))
        .route("/limited/chat/completions", post(rate_limited))
        .with_state(upstream.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), upstream)
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Stack {
    app: Router,
    upstream: Upstream,
    _dir: tempfile::TempDir,
}

async fn stack() -> Stack {
    let (base, upstream) = spawn_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        format!(
            r#"
default_provider = "openai"
default_model = "gpt-4o-mini"

[providers.openai]
api_key = "sk-e2e"
base_url = "{base}/v1"

[providers.deepseek]
api_key = "sk-limited"
base_url = "{base}/limited"

[turn]
max_tool_rounds = 3
"#
        ),
    )
    .unwrap();

    let config = AppConfig::load_from(&path).unwrap();
    let state = AppState::from_config(config).unwrap();
    Stack {
        app: build_router(state),
        upstream,
        _dir: dir,
    }
}

fn chat(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn lines(app: &Router, request: Request<Body>) -> Vec<Value> {
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn plain_turn_over_http() {
    let stack = stack().await;

    let out = lines(
        &stack.app,
        chat(json!({"messages": [{"role": "user", "content": "Hello"}], "tempChat": true})),
    )
    .await;

    assert_eq!(out, vec![json!({"c": "Plain answer"})]);
    assert_eq!(stack.upstream.auth.lock().unwrap()[0], "Bearer sk-e2e");

    let bodies = stack.upstream.bodies.lock().unwrap();
    assert_eq!(bodies[0]["model"], "gpt-4o-mini");
    assert_eq!(bodies[0]["stream"], true);
}

#[tokio::test]
async fn tool_round_trip_over_http() {
    let stack = stack().await;

    let out = lines(
        &stack.app,
        chat(json!({"messages": [{"role": "user", "content": "please lookup the answer"}], "tempChat": true})),
    )
    .await;
    assert_eq!(out, vec![json!({"c": "The answer is 42."})]);

    let bodies = stack.upstream.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 2, "one request per round");

    let continuation = bodies[1]["messages"].as_array().unwrap();
    let assistant = &continuation[continuation.len() - 2];
    assert_eq!(assistant["role"], "assistant");
    assert_eq!(assistant["tool_calls"][0]["id"], "call_1");

    let tool = continuation.last().unwrap();
    assert_eq!(tool["role"], "tool");
    assert_eq!(tool["tool_call_id"], "call_1");
    // `lookup` is not a registered tool; the model hears about it in-band
    assert!(tool["content"].as_str().unwrap().contains("Tool not implemented"));
}

#[tokio::test]
async fn upstream_http_error_ends_the_stream() {
    let stack = stack().await;

    let out = lines(
        &stack.app,
        chat(json!({
            "messages": [{"role": "user", "content": "Hello"}],
            "provider": "deepseek",
            "model": "deepseek-chat",
            "tempChat": true
        })),
    )
    .await;

    assert_eq!(out.len(), 1);
    assert!(out[0]["e"].as_str().unwrap().contains("Rate limit reached"));
}

#[tokio::test]
async fn persisted_session_branch() {
    let stack = stack().await;

    lines(
        &stack.app,
        chat(json!({"messages": [{"role": "user", "content": "Hello"}], "sessionId": "e2e-session"})),
    )
    .await;

    let request = Request::builder()
        .uri("/api/sessions/e2e-session/messages")
        .body(Body::empty())
        .unwrap();
    let response = stack.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let branch: Vec<Value> = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(branch.len(), 2);
    assert_eq!(branch[0]["content"], "Hello");
    assert_eq!(branch[1]["content"], "Plain answer");
    assert_eq!(branch[1]["status"], "completed");
    assert_eq!(branch[1]["parentId"], branch[0]["id"]);
}

#[tokio::test]
async fn model_listing_over_http() {
    let stack = stack().await;

    let request = Request::builder()
        .uri("/api/providers/openai/models")
        .body(Body::empty())
        .unwrap();
    let response = stack.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let ids: Vec<&str> = body["models"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["gpt-4o", "gpt-4o-mini"]);
}

#[test]
fn default_config_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, AppConfig::default_toml()).unwrap();

    let loaded = AppConfig::load_from(&path).unwrap();
    let defaults = AppConfig::default();
    assert_eq!(loaded.default_provider, defaults.default_provider);
    assert_eq!(loaded.turn.max_tool_rounds, 8);
    assert_eq!(loaded.gateway.port, defaults.gateway.port);
}

#[test]
fn invalid_config_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[turn]\nmax_tool_rounds = 0\n").unwrap();
    assert!(AppConfig::load_from(&path).is_err());

    std::fs::write(&path, "default_provider = [").unwrap();
    assert!(AppConfig::load_from(&path).is_err());
}
