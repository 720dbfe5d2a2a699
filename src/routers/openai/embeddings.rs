use tracing::debug;

use super::{post_json, send_json};
use crate::{
    app_context::AppContext,
    config::ModelConfig,
    core::GatewayResult,
    protocols::embeddings::{EmbeddingRequest, EmbeddingResponse},
    routers::dispatch::{dispatch_buffered, request_id, user_id},
    usage::{record_usage, ApiType, UsageRecord},
};

pub const REQUEST_ID_PREFIX: &str = "embd-";

/// Usage record shared by both embeddings backends.
pub(crate) fn embeddings_usage_record(
    request: &EmbeddingRequest,
    model: &str,
    request_id: &str,
    prompt_tokens: u64,
) -> UsageRecord {
    UsageRecord::new(
        ApiType::Embeddings,
        model,
        request_id,
        user_id(request.user.as_deref()),
        prompt_tokens,
        0,
    )
    .with_input_count(request.input.len())
    .with_extra("encoding_format", request.encoding_format.as_deref())
    .with_extra("dimensions", request.dimensions)
}

pub async fn create_embeddings(
    ctx: &AppContext,
    model: &ModelConfig,
    api_key: &str,
    request: EmbeddingRequest,
) -> GatewayResult<EmbeddingResponse> {
    let id = request_id(REQUEST_ID_PREFIX);
    debug!(
        "Embeddings {} for model {} with {} inputs",
        id,
        model.name,
        request.input.len()
    );

    let backend: EmbeddingResponse = dispatch_buffered(&ctx.balancer, model, |endpoint| {
        send_json(post_json(&ctx.client, &endpoint, "/embeddings", api_key, &request))
    })
    .await
    .map_err(|e| e.with_context("Embeddings error"))?;

    let response = EmbeddingResponse::new(backend.model, backend.data, backend.usage);

    record_usage(
        ctx.usage.as_ref(),
        embeddings_usage_record(&request, &model.name, &id, response.usage.prompt_tokens),
    );

    Ok(response)
}
