use axum::response::Response;
use tracing::debug;

use super::{post_json, send_json, stream_response, StreamAccounting};
use crate::{
    app_context::AppContext,
    config::ModelConfig,
    core::{GatewayError, GatewayResult},
    protocols::chat::{ChatCompletionRequest, ChatCompletionResponse, ChatStreamChunk, ChatUsage},
    routers::dispatch::{acquire, dispatch_buffered, request_id, user_id},
    usage::{record_usage, ApiType, UsageRecord},
};

pub const REQUEST_ID_PREFIX: &str = "chatcmpl-";

fn usage_record(
    model: &str,
    request_id: &str,
    user_id: &str,
    usage: &ChatUsage,
    finish_reason: Option<&str>,
    input_count: usize,
) -> UsageRecord {
    UsageRecord::new(
        ApiType::Chat,
        model,
        request_id,
        user_id,
        usage.prompt_tokens,
        usage.completion_tokens,
    )
    .with_input_count(input_count)
    .with_extra("reasoning_tokens", usage.reasoning_tokens())
    .with_extra("cached_tokens", usage.cached_tokens())
    .with_extra("finish_reason", finish_reason)
}

/// Buffered chat completion.
pub async fn chat_completion(
    ctx: &AppContext,
    model: &ModelConfig,
    api_key: &str,
    request: ChatCompletionRequest,
) -> GatewayResult<ChatCompletionResponse> {
    request.validate().map_err(GatewayError::invalid_request)?;
    let id = request_id(REQUEST_ID_PREFIX);
    debug!("Chat completion {} for model {}", id, model.name);

    let body = request.backend_request(false);
    let response: ChatCompletionResponse = dispatch_buffered(&ctx.balancer, model, |endpoint| {
        send_json(post_json(&ctx.client, &endpoint, "/chat/completions", api_key, &body))
    })
    .await
    .map_err(|e| e.with_context("Chat completion error"))?;

    if let Some(usage) = &response.usage {
        let finish_reason = response
            .choices
            .first()
            .and_then(|c| c.finish_reason.as_deref());
        record_usage(
            ctx.usage.as_ref(),
            usage_record(
                &model.name,
                &response.id,
                &user_id(request.user.as_deref()),
                usage,
                finish_reason,
                request.messages.len(),
            ),
        );
    }

    Ok(response)
}

/// Streaming chat completion. Validation and endpoint selection happen
/// before any bytes are sent; everything after is reported in-stream.
pub fn chat_completion_stream(
    ctx: &AppContext,
    model: &ModelConfig,
    api_key: &str,
    request: ChatCompletionRequest,
) -> GatewayResult<Response> {
    request.validate().map_err(GatewayError::invalid_request)?;
    let id = request_id(REQUEST_ID_PREFIX);
    debug!("Streaming chat completion {} for model {}", id, model.name);

    let guard = acquire(&ctx.balancer, model)?;
    let upstream = post_json(
        &ctx.client,
        guard.endpoint(),
        "/chat/completions",
        api_key,
        &request.backend_request(true),
    );

    let accounting = ChatStreamAccounting {
        model: model.name.clone(),
        request_id: id,
        user_id: user_id(request.user.as_deref()),
        input_count: request.messages.len(),
        usage: None,
        finish_reason: None,
    };
    Ok(stream_response(upstream, guard, accounting, ctx.usage.clone()))
}

/// Collects usage and the finish reason from `chat.completion.chunk` events.
#[derive(Debug)]
pub(crate) struct ChatStreamAccounting {
    model: String,
    request_id: String,
    user_id: String,
    input_count: usize,
    usage: Option<ChatUsage>,
    finish_reason: Option<String>,
}

impl StreamAccounting for ChatStreamAccounting {
    fn observe(&mut self, data: &str) {
        let Ok(chunk) = serde_json::from_str::<ChatStreamChunk>(data) else {
            return;
        };
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        if let Some(reason) = chunk.choices.into_iter().find_map(|c| c.finish_reason) {
            self.finish_reason = Some(reason);
        }
    }

    fn finish(self) -> Option<UsageRecord> {
        let usage = self.usage?;
        if usage.prompt_tokens == 0 && usage.completion_tokens == 0 {
            return None;
        }
        Some(usage_record(
            &self.model,
            &self.request_id,
            &self.user_id,
            &usage,
            self.finish_reason.as_deref(),
            self.input_count,
        ))
    }
}
