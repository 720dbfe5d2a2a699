use axum::response::Response;
use tracing::debug;

use super::{post_json, send_json, stream_response, StreamAccounting};
use crate::{
    app_context::AppContext,
    config::ModelConfig,
    core::GatewayResult,
    protocols::responses::{
        ResponsesRequest, ResponsesResponse, ResponsesStreamEvent, ResponsesUsage,
    },
    routers::dispatch::{acquire, dispatch_buffered, request_id, user_id},
    usage::{record_usage, ApiType, UsageRecord},
};

pub const REQUEST_ID_PREFIX: &str = "resp-";

fn usage_record(
    model: &str,
    request_id: &str,
    user_id: &str,
    usage: &ResponsesUsage,
    status: Option<&str>,
) -> UsageRecord {
    UsageRecord::new(
        ApiType::Chat,
        model,
        request_id,
        user_id,
        usage.input_tokens.unwrap_or(0),
        usage.output_tokens.unwrap_or(0),
    )
    .with_input_count(1)
    .with_extra("reasoning_tokens", usage.reasoning_tokens())
    .with_extra("cached_tokens", usage.cached_tokens())
    .with_extra("finish_reason", status)
}

pub async fn create_response(
    ctx: &AppContext,
    model: &ModelConfig,
    api_key: &str,
    request: ResponsesRequest,
) -> GatewayResult<ResponsesResponse> {
    debug!(
        "Responses request {} for model {}",
        request_id(REQUEST_ID_PREFIX),
        model.name
    );

    let body = request.backend_request(false);
    let response: ResponsesResponse = dispatch_buffered(&ctx.balancer, model, |endpoint| {
        send_json(post_json(&ctx.client, &endpoint, "/responses", api_key, &body))
    })
    .await
    .map_err(|e| e.with_context("Responses API error"))?;

    if let Some(usage) = &response.usage {
        record_usage(
            ctx.usage.as_ref(),
            usage_record(
                &model.name,
                &response.id,
                &user_id(request.user.as_deref()),
                usage,
                response.status.as_deref(),
            ),
        );
    }

    Ok(response)
}

pub fn create_response_stream(
    ctx: &AppContext,
    model: &ModelConfig,
    api_key: &str,
    request: ResponsesRequest,
) -> GatewayResult<Response> {
    let id = request_id(REQUEST_ID_PREFIX);
    debug!("Streaming responses request {} for model {}", id, model.name);

    let guard = acquire(&ctx.balancer, model)?;
    let upstream = post_json(
        &ctx.client,
        guard.endpoint(),
        "/responses",
        api_key,
        &request.backend_request(true),
    );

    let accounting = ResponsesStreamAccounting {
        model: model.name.clone(),
        request_id: id,
        user_id: user_id(request.user.as_deref()),
        response_id: None,
        status: None,
        usage: None,
    };
    Ok(stream_response(upstream, guard, accounting, ctx.usage.clone()))
}

/// Reads usage, id and status from the `response` snapshot that lifecycle
/// events carry. The last snapshot seen wins.
#[derive(Debug)]
pub(crate) struct ResponsesStreamAccounting {
    model: String,
    request_id: String,
    user_id: String,
    response_id: Option<String>,
    status: Option<String>,
    usage: Option<ResponsesUsage>,
}

impl StreamAccounting for ResponsesStreamAccounting {
    fn observe(&mut self, data: &str) {
        let Some(snapshot) = serde_json::from_str::<ResponsesStreamEvent>(data)
            .ok()
            .and_then(|event| event.response)
        else {
            return;
        };
        if snapshot.id.is_some() {
            self.response_id = snapshot.id;
        }
        if snapshot.status.is_some() {
            self.status = snapshot.status;
        }
        if snapshot.usage.is_some() {
            self.usage = snapshot.usage;
        }
    }

    fn finish(self) -> Option<UsageRecord> {
        let usage = self.usage?;
        if usage.input_tokens.unwrap_or(0) == 0 && usage.output_tokens.unwrap_or(0) == 0 {
            return None;
        }
        let request_id = self.response_id.unwrap_or(self.request_id);
        Some(usage_record(
            &self.model,
            &request_id,
            &self.user_id,
            &usage,
            self.status.as_deref(),
        ))
    }
}
