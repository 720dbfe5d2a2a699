//! Adapters for OpenAI-protocol backends
//!
//! Each adapter reaches `{endpoint}/v1/...` over the shared reqwest client
//! with the resolved credential as a bearer token.

pub mod audio;
pub mod chat;
pub mod embeddings;
pub mod responses;
pub mod streaming;

use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::core::{GatewayError, GatewayResult, ModelEndpoint};

pub use streaming::{error_chunk, stream_response, StreamAccounting};

/// Build a JSON POST to `{endpoint}/v1{path}`.
pub(crate) fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    endpoint: &ModelEndpoint,
    path: &str,
    api_key: &str,
    body: &B,
) -> RequestBuilder {
    client
        .post(endpoint.url(&format!("/v1{}", path)))
        .bearer_auth(api_key)
        .json(body)
}

/// Send `request` and decode a successful JSON answer.
pub(crate) async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> GatewayResult<T> {
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Turn a non-2xx backend answer into an API failure.
pub(crate) async fn error_from_response(response: Response) -> GatewayError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    backend_error(status.as_u16(), &text)
}

/// `error.message` from an OpenAI-style error body, or a top-level
/// `message`, or a bare string `error`.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let message = match parsed.get("error") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(error) => error.get("message").and_then(Value::as_str),
        None => parsed.get("message").and_then(Value::as_str),
    };
    message.map(String::from)
}

/// Turn a backend error body into an API failure, falling back to the raw
/// text when it is not an OpenAI error envelope.
pub(crate) fn backend_error(status: u16, body: &str) -> GatewayError {
    let message = error_message(body).unwrap_or_else(|| {
        if body.trim().is_empty() {
            format!("backend returned status {}", status)
        } else {
            body.trim().to_string()
        }
    });

    let code = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| match v.get("error")?.get("code")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| status.to_string());

    GatewayError::api(format!("Error code: {} - {}", status, message), Some(code))
}
