// Mock OpenAI-protocol backend for integration tests
#![allow(dead_code)]

use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::Body,
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::oneshot};

#[derive(Debug, Default)]
pub struct BackendState {
    fail: AtomicBool,
    requests: AtomicUsize,
    last_authorization: Mutex<Option<String>>,
    last_body: Mutex<Option<Value>>,
}

impl BackendState {
    fn observe(&self, headers: &HeaderMap) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let auth = headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .map(String::from);
        *self.last_authorization.lock().unwrap() = auth;
    }
}

pub struct MockBackend {
    pub port: u16,
    state: Arc<BackendState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(BackendState::default());
        let app = Router::new()
            .route("/v1/chat/completions", post(chat_handler))
            .route("/v1/embeddings", post(embeddings_handler))
            .route("/v1/responses", post(responses_handler))
            .route("/v1/audio/transcriptions", post(transcription_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(10)).await;

        Self {
            port,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().unwrap().clone()
    }

    pub fn last_body(&self) -> Option<Value> {
        self.state.last_body.lock().unwrap().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn failure() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": {
                "message": "backend overloaded",
                "type": "server_error",
                "code": "overloaded"
            }
        })),
    )
        .into_response()
}

fn sse(events: Vec<String>) -> Response {
    let body = events
        .into_iter()
        .map(|e| format!("{}\n\n", e))
        .collect::<String>();
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .body(Body::from(body))
        .unwrap()
}

/// An SSE body that keeps emitting deltas for several seconds.
fn slow_sse() -> Response {
    let chunks = stream::iter(0..200).then(|i| async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let chunk = json!({"choices": [{"index": 0, "delta": {"content": format!("t{}", i)}}]});
        Ok::<_, Infallible>(Bytes::from(format!("data: {}\n\n", chunk)))
    });
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(chunks))
        .unwrap()
}

fn delta_chunk(content: &str) -> Value {
    json!({"choices": [{"index": 0, "delta": {"content": content}}]})
}

/// Two deltas, then the connection breaks before the stream is complete.
fn broken_sse() -> Response {
    let deltas = stream::iter(["part one", "part two"])
        .map(|content| Ok(Bytes::from(format!("data: {}\n\n", delta_chunk(content)))));
    // Give the deltas time to reach the gateway before the reset
    let reset = stream::once(async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "backend crashed",
        ))
    });
    let chunks = deltas.chain(reset);
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(chunks))
        .unwrap()
}

async fn chat_handler(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.observe(&headers);
    *state.last_body.lock().unwrap() = Some(body.clone());
    if state.fail.load(Ordering::SeqCst) {
        return failure();
    }

    let model = body["model"].as_str().unwrap_or("unknown").to_string();
    let stream = body["stream"].as_bool().unwrap_or(false);
    let content = body["messages"][0]["content"].as_str().unwrap_or_default();

    if stream {
        match content {
            "slow" => return slow_sse(),
            "broken" => return broken_sse(),
            "error-event" => {
                return sse(vec![
                    format!("data: {}", delta_chunk("partial")),
                    format!(
                        "data: {}",
                        json!({"error": {"message": "engine died", "code": 500}})
                    ),
                    "data: [DONE]".to_string(),
                ])
            }
            _ => {}
        }
    }

    if stream {
        let chunk = |delta: Value, finish: Value| {
            json!({
                "id": "chatcmpl-upstream",
                "object": "chat.completion.chunk",
                "created": 1700000000,
                "model": model,
                "choices": [{"index": 0, "delta": delta, "finish_reason": finish}]
            })
        };
        return sse(vec![
            format!("data: {}", chunk(json!({"role": "assistant"}), Value::Null)),
            format!("data: {}", chunk(json!({"content": "Hello"}), Value::Null)),
            format!("data: {}", chunk(json!({}), json!("stop"))),
            format!(
                "data: {}",
                json!({
                    "id": "chatcmpl-upstream",
                    "object": "chat.completion.chunk",
                    "created": 1700000000,
                    "model": model,
                    "choices": [],
                    "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
                })
            ),
            "data: [DONE]".to_string(),
        ]);
    }

    Json(json!({
        "id": "chatcmpl-upstream",
        "object": "chat.completion",
        "created": 1700000000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello from mock"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 4, "total_tokens": 9}
    }))
    .into_response()
}

async fn embeddings_handler(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.observe(&headers);
    *state.last_body.lock().unwrap() = Some(body.clone());
    if state.fail.load(Ordering::SeqCst) {
        return failure();
    }

    let count = match &body["input"] {
        Value::Array(items) => items.len(),
        _ => 1,
    };
    let data: Vec<Value> = (0..count)
        .map(|i| json!({"object": "embedding", "embedding": [0.1, 0.2, 0.3], "index": i}))
        .collect();

    Json(json!({
        "object": "list",
        "data": data,
        "model": "upstream-embedder",
        "usage": {"prompt_tokens": 3 * count, "total_tokens": 3 * count}
    }))
    .into_response()
}

async fn responses_handler(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.observe(&headers);
    *state.last_body.lock().unwrap() = Some(body.clone());
    if state.fail.load(Ordering::SeqCst) {
        return failure();
    }

    let usage = json!({"input_tokens": 8, "output_tokens": 6, "total_tokens": 14});
    if body["stream"].as_bool().unwrap_or(false) {
        return sse(vec![
            format!(
                "event: response.created\ndata: {}",
                json!({"type": "response.created", "response": {"id": "resp_up", "status": "in_progress"}})
            ),
            format!(
                "event: response.output_text.delta\ndata: {}",
                json!({"type": "response.output_text.delta", "delta": "Hi"})
            ),
            format!(
                "event: response.completed\ndata: {}",
                json!({"type": "response.completed", "response": {"id": "resp_up", "status": "completed", "usage": usage}})
            ),
        ]);
    }

    Json(json!({
        "id": "resp_up",
        "object": "response",
        "status": "completed",
        "model": body["model"],
        "output": [{"type": "message", "content": [{"type": "output_text", "text": "Hi"}]}],
        "usage": usage
    }))
    .into_response()
}

async fn transcription_handler(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    state.observe(&headers);

    let mut format = "json".to_string();
    let mut file_len = 0;
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name().unwrap_or_default() {
            "response_format" => format = field.text().await.unwrap_or_default(),
            "file" => file_len = field.bytes().await.map(|b| b.len()).unwrap_or(0),
            _ => {
                let _ = field.bytes().await;
            }
        }
    }

    if state.fail.load(Ordering::SeqCst) {
        return failure();
    }

    match format.as_str() {
        "srt" => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "message": "response_format 'srt' is not supported for this model",
                    "type": "invalid_request_error"
                }
            })),
        )
            .into_response(),
        "json" | "verbose_json" => Json(json!({
            "text": format!("transcribed {} bytes", file_len),
            "usage": {"type": "tokens", "output_tokens": 3}
        }))
        .into_response(),
        _ => format!("transcribed {} bytes", file_len).into_response(),
    }
}
