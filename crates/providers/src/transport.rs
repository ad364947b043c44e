//! HTTP transport: sends a wire request and turns the response body into a
//! channel of SSE frames.
//!
//! The transport is a trait so the turn pipeline can be driven by scripted
//! frames in tests.

use std::time::Duration;

use async_trait::async_trait;
use chatforge_core::ChatError;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::adapter::WireRequest;
use crate::errors::{normalize_http, normalize_transport};
use crate::sse::{SseDecoder, SseFrame};

/// Frames of one upstream response, in arrival order. Dropping the receiver
/// aborts the upstream connection.
pub type FrameReceiver = mpsc::Receiver<Result<SseFrame, ChatError>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a streaming request. Non-success statuses become normalized errors.
    async fn open_stream(
        &self,
        provider: &str,
        request: WireRequest,
    ) -> Result<FrameReceiver, ChatError>;

    /// GET a JSON document.
    async fn get_json(
        &self,
        provider: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Value, ChatError>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    /// Bound on waiting for response headers
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ChatError::internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            request_timeout,
        })
    }

    pub fn with_client(client: reqwest::Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    fn apply_headers(
        mut builder: reqwest::RequestBuilder,
        headers: &[(String, String)],
    ) -> reqwest::RequestBuilder {
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_stream(
        &self,
        provider: &str,
        request: WireRequest,
    ) -> Result<FrameReceiver, ChatError> {
        debug!(provider = %provider, url = %redact_query(&request.url), "Opening upstream stream");

        let builder = Self::apply_headers(self.client.post(&request.url), &request.headers)
            .header("Accept", "text/event-stream")
            .json(&request.body);

        let response = tokio::time::timeout(self.request_timeout, builder.send())
            .await
            .map_err(|_| {
                ChatError::timeout(format!(
                    "no response from {provider} within {}s",
                    self.request_timeout.as_secs()
                ))
                .with_provider(provider)
            })?
            .map_err(|e| normalize_transport(provider, &e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(provider = %provider, status, body = %body, "Provider streaming error");
            return Err(normalize_http(provider, status, &body));
        }

        let (tx, rx) = mpsc::channel(64);
        let provider = provider.to_string();

        // Read the body until it ends or the receiver goes away. Waiting on
        // `closed` drops the response, and with it the connection, even while
        // the upstream sends nothing.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = tx.closed() => {
                        trace!(provider = %provider, "Stream receiver dropped");
                        return;
                    }
                    chunk = byte_stream.next() => chunk,
                };
                let Some(chunk) = chunk else { break };

                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(normalize_transport(&provider, &e))).await;
                        return;
                    }
                };
                let frames = match decoder.push(&bytes) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(provider = %provider, error = %e.message, "Malformed upstream stream");
                        let _ = tx.send(Err(e.with_provider(&provider))).await;
                        return;
                    }
                };
                for frame in frames {
                    if tx.send(Ok(frame)).await.is_err() {
                        trace!(provider = %provider, "Stream receiver dropped");
                        return;
                    }
                }
            }

            if let Some(frame) = decoder.finish() {
                let _ = tx.send(Ok(frame)).await;
            }
        });

        Ok(rx)
    }

    async fn get_json(
        &self,
        provider: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Value, ChatError> {
        let response = Self::apply_headers(self.client.get(url), headers)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| normalize_transport(provider, &e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| normalize_transport(provider, &e))?;

        if !(200..300).contains(&status) {
            return Err(normalize_http(provider, status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            ChatError::new(
                chatforge_core::ErrorKind::UpstreamServerError,
                format!("invalid JSON from {provider}: {e}"),
            )
            .with_provider(provider)
        })
    }
}

/// Strip query strings (which may carry keys) before logging a URL.
fn redact_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{StatusCode, header};
    use axum::routing::{get, post};
    use chatforge_core::ErrorKind;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn wire(url: String) -> WireRequest {
        WireRequest {
            url,
            headers: vec![("Authorization".into(), "Bearer sk-test".into())],
            body: serde_json::json!({"stream": true}),
        }
    }

    #[tokio::test]
    async fn streams_frames_in_order() {
        let app = Router::new().route(
            "/stream",
            post(|| async {
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    "data: {\"n\":1}\n\ndata: {\"n\":2}\n\ndata: [DONE]\n\n",
                )
            }),
        );
        let base = serve(app).await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let mut rx = transport
            .open_stream("test", wire(format!("{base}/stream")))
            .await
            .unwrap();

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame.unwrap().data);
        }
        assert_eq!(frames, vec!["{\"n\":1}", "{\"n\":2}", "[DONE]"]);
    }

    #[tokio::test]
    async fn error_status_is_normalized() {
        let app = Router::new().route(
            "/stream",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    r#"{"error":{"message":"bad key","code":"invalid_api_key"}}"#,
                )
            }),
        );
        let base = serve(app).await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let err = transport
            .open_stream("openai", wire(format!("{base}/stream")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(err.status, Some(401));
        assert_eq!(err.message, "bad key");
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let app = Router::new().route(
            "/stream",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "data: late\n\n"
            }),
        );
        let base = serve(app).await;
        let transport = HttpTransport::new(Duration::from_millis(100)).unwrap();
        let err = transport
            .open_stream("openai", wire(format!("{base}/stream")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamTimeout);
    }

    #[tokio::test]
    async fn dropping_receiver_closes_idle_upstream() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await.unwrap();
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\
                      transfer-encoding: chunked\r\n\r\n\
                      f\r\ndata: {\"n\":1}\n\n\r\n",
                )
                .await
                .unwrap();
            // Go idle; a read returns once the client hangs up
            let mut rest = [0u8; 64];
            loop {
                match socket.read(&mut rest).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = closed_tx.send(());
        });

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let mut rx = transport
            .open_stream("test", wire(format!("http://{addr}/stream")))
            .await
            .unwrap();
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.data, "{\"n\":1}");

        drop(rx);
        tokio::time::timeout(Duration::from_secs(3), closed_rx)
            .await
            .expect("upstream connection still open after receiver drop")
            .unwrap();
    }

    #[tokio::test]
    async fn get_json_parses_body() {
        let app = Router::new().route(
            "/models",
            get(|| async { axum::Json(serde_json::json!({"data": [{"id": "m1"}]})) }),
        );
        let base = serve(app).await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let body = transport
            .get_json("test", &format!("{base}/models"), &[])
            .await
            .unwrap();
        assert_eq!(body["data"][0]["id"], "m1");
    }

    #[test]
    fn query_is_redacted_for_logging() {
        assert_eq!(redact_query("https://x/y?key=secret"), "https://x/y");
        assert_eq!(redact_query("https://x/y"), "https://x/y");
    }
}
