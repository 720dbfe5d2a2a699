//! Streaming response handling for OpenAI-compatible backends
//!
//! The upstream SSE stream is re-framed block by block and forwarded through
//! an unbounded channel. The spawned pump task owns the `RequestGuard`, so
//! the endpoint's outcome is recorded only once the stream has fully drained
//! (success) or stopped early (failure). A client that disconnects drops the
//! receiver, the next send fails, and the guard records a failure. An error
//! event inside a 200 stream is treated like a broken upstream.

use std::{borrow::Cow, io, sync::Arc};

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::Response,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use super::error_from_response;
use crate::{
    core::{FailureKind, GatewayError, RequestGuard},
    usage::{record_usage, UsageRecord, UsageRecorder},
};

pub(crate) const DONE_CHUNK: &str = "data: [DONE]\n\n";

type ChunkSender = mpsc::UnboundedSender<Result<Bytes, io::Error>>;

/// Per-protocol bookkeeping over the forwarded data payloads.
pub trait StreamAccounting: Send + 'static {
    /// Inspect one `data:` payload before it is forwarded.
    fn observe(&mut self, data: &str);

    /// The usage record to emit once the stream drained cleanly.
    fn finish(self) -> Option<UsageRecord>;
}

// ============================================================================
// Chunk Processor
// ============================================================================

/// Processes incoming byte chunks into complete SSE blocks.
/// Handles buffering of partial chunks and CRLF normalization. A multi-byte
/// character split across chunks is held back until its tail arrives.
pub(crate) struct ChunkProcessor {
    pending: String,
    partial: Vec<u8>,
}

impl ChunkProcessor {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            partial: Vec::new(),
        }
    }

    /// Append a chunk to the buffer, normalizing line endings
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.partial);
        bytes.extend_from_slice(chunk);

        let mut rest = &bytes[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.pending.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    self.pending.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            self.pending.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.partial = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        // A CRLF pair may straddle two chunks, so normalize the whole buffer
        if self.pending.contains("\r\n") {
            self.pending = self.pending.replace("\r\n", "\n");
        }
    }

    /// Extract the next complete SSE block from the buffer, if available
    pub fn next_block(&mut self) -> Option<String> {
        loop {
            let pos = self.pending.find("\n\n")?;
            let block = self.pending[..pos].to_string();
            self.pending.drain(..pos + 2);

            if !block.trim().is_empty() {
                return Some(block);
            }
        }
    }

    pub fn has_remaining(&self) -> bool {
        !self.pending.trim().is_empty() || !self.partial.is_empty()
    }

    pub fn take_remaining(&mut self) -> String {
        let mut rest = std::mem::take(&mut self.pending);
        if !self.partial.is_empty() {
            rest.push_str(&String::from_utf8_lossy(&std::mem::take(&mut self.partial)));
        }
        rest
    }
}

/// Split an SSE block into its event name and joined data lines.
pub(crate) fn parse_sse_block(block: &str) -> (Option<&str>, Cow<'_, str>) {
    let mut event_name: Option<&str> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }

    let data = if data_lines.len() == 1 {
        Cow::Borrowed(data_lines[0])
    } else {
        Cow::Owned(data_lines.join("\n"))
    };

    (event_name, data)
}

/// An error event delivered inside an otherwise successful stream: either a
/// top-level `error` object or a Responses `{"type":"error"}` event.
pub(crate) fn stream_error_event(data: &str) -> Option<GatewayError> {
    if !data.contains("error") {
        return None;
    }
    let value: Value = serde_json::from_str(data).ok()?;
    let error = match value.get("error") {
        Some(error @ Value::Object(_)) => error,
        _ if value.get("type").and_then(Value::as_str) == Some("error") => &value,
        _ => return None,
    };

    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("upstream reported an error mid-stream");
    let code = match error.get("code") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    Some(GatewayError::api(message, code))
}

/// The terminal SSE chunk sent when a stream fails.
pub fn error_chunk(err: &GatewayError) -> Bytes {
    let (error_type, code) = match err {
        GatewayError::Downstream { kind, code, .. } => (kind.as_str(), code.clone()),
        _ => (FailureKind::Internal.as_str(), None),
    };
    let payload = json!({
        "error": {
            "message": err.to_string(),
            "type": error_type,
            "code": code,
        }
    });
    Bytes::from(format!("data: {}\n\n", payload))
}

// ============================================================================
// Stream pump
// ============================================================================

/// Open `request` as a stream and answer with an SSE body.
///
/// The response headers go out immediately. Failures opening the upstream
/// stream surface as a terminal error chunk rather than an HTTP status.
pub fn stream_response<A: StreamAccounting>(
    request: reqwest::RequestBuilder,
    guard: RequestGuard,
    accounting: A,
    usage: Arc<dyn UsageRecorder>,
) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, io::Error>>();

    tokio::spawn(async move {
        let endpoint = guard.endpoint().to_string();
        match pump(request, accounting, &tx).await {
            Ok(Some(accounting)) => {
                if let Some(record) = accounting.finish() {
                    record_usage(usage.as_ref(), record);
                }
                guard.succeed();
            }
            Ok(None) => {
                debug!("Client disconnected from stream served by {}", endpoint);
                guard.fail();
            }
            Err(err) => {
                warn!("Stream from {} failed: {}", endpoint, err);
                let _ = tx.send(Ok(error_chunk(&err)));
                let _ = tx.send(Ok(Bytes::from_static(DONE_CHUNK.as_bytes())));
                guard.fail();
            }
        }
    });

    let mut response = Response::new(Body::from_stream(UnboundedReceiverStream::new(rx)));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response
}

/// Forward the upstream stream. `Ok(None)` means the client went away.
async fn pump<A: StreamAccounting>(
    request: reqwest::RequestBuilder,
    mut accounting: A,
    tx: &ChunkSender,
) -> Result<Option<A>, GatewayError> {
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    let mut processor = ChunkProcessor::new();
    let mut upstream = response.bytes_stream();

    loop {
        // Notice a departed client even while upstream is idle
        let chunk = tokio::select! {
            chunk = upstream.next() => chunk,
            _ = tx.closed() => return Ok(None),
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|e| GatewayError::downstream(format!("stream interrupted: {}", e)))?;
        processor.push_chunk(&chunk);
        while let Some(block) = processor.next_block() {
            if !forward_block(&block, &mut accounting, tx)? {
                return Ok(None);
            }
        }
    }

    if processor.has_remaining() {
        let rest = processor.take_remaining();
        if !forward_block(&rest, &mut accounting, tx)? {
            return Ok(None);
        }
    }

    if tx.send(Ok(Bytes::from_static(DONE_CHUNK.as_bytes()))).is_err() {
        return Ok(None);
    }
    Ok(Some(accounting))
}

/// `Ok(false)` once the receiving side is closed. An in-stream error event
/// ends the stream as a failure instead of being forwarded.
fn forward_block<A: StreamAccounting>(
    block: &str,
    accounting: &mut A,
    tx: &ChunkSender,
) -> Result<bool, GatewayError> {
    let (_, data) = parse_sse_block(block);
    let data = data.trim();
    // The closing marker is ours to send
    if data.is_empty() || data == "[DONE]" {
        return Ok(!tx.is_closed());
    }
    if let Some(err) = stream_error_event(data) {
        return Err(err);
    }

    accounting.observe(data);
    Ok(tx.send(Ok(Bytes::from(format!("data: {}\n\n", data)))).is_ok())
}
