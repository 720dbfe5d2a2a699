use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, info, warn};

use crate::{
    app_context::AppContext,
    config::ModelConfig,
    core::{GatewayError, GatewayResult},
    grpc_client::triton_proto::ModelInferRequest,
    protocols::embeddings::{
        EmbeddingObject, EmbeddingRequest, EmbeddingResponse, EmbeddingUsage, EmbeddingVector,
    },
    routers::{
        dispatch::{dispatch_buffered, request_id},
        openai::embeddings::{embeddings_usage_record, REQUEST_ID_PREFIX},
    },
    usage::{estimate_tokens_batch, record_usage},
};

pub const MAX_INPUTS: usize = 2048;
const QUERY_INPUT: &str = "query";
const DOCUMENTS_INPUT: &str = "documents";
const EMBEDDINGS_OUTPUT: &str = "embeddings";
const INFER_TIMEOUT: Duration = Duration::from_secs(300);
const NORM_TOLERANCE: f32 = 0.1;

/// One input goes to `query` with shape `[1]`; several go to `documents`
/// with shape `[1, n]`.
pub(crate) fn build_infer_request(model: &str, id: &str, texts: &[String]) -> ModelInferRequest {
    let request = ModelInferRequest::new(model, id);
    let request = if texts.len() == 1 {
        request.with_bytes_input(QUERY_INPUT, vec![1], texts)
    } else {
        request.with_bytes_input(DOCUMENTS_INPUT, vec![1, texts.len() as i64], texts)
    };
    request.with_output(EMBEDDINGS_OUTPUT)
}

fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

fn check_vectors(rows: &[Vec<f32>], dimensions: Option<u32>) {
    if let (Some(requested), Some(first)) = (dimensions, rows.first()) {
        if first.len() != requested as usize {
            warn!(
                "Requested dimensions ({}) differ from actual ({}); the model may not support custom dimensions",
                requested,
                first.len()
            );
        }
    }
    for (i, row) in rows.iter().enumerate() {
        let norm = l2_norm(row);
        if (norm - 1.0).abs() > NORM_TOLERANCE {
            warn!("Embedding {} has unexpected norm: {:.6} (expected ~1.0)", i, norm);
        }
    }
}

fn encode_base64(vector: &[f32]) -> String {
    let bytes: Vec<u8> = vector.iter().flat_map(|v| v.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

pub(crate) fn to_embedding_objects(rows: Vec<Vec<f32>>, base64: bool) -> Vec<EmbeddingObject> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            let vector = if base64 {
                EmbeddingVector::Base64(encode_base64(&row))
            } else {
                EmbeddingVector::Float(row)
            };
            EmbeddingObject::new(i as u32, vector)
        })
        .collect()
}

pub async fn create_embeddings(
    ctx: &AppContext,
    model: &ModelConfig,
    request: EmbeddingRequest,
) -> GatewayResult<EmbeddingResponse> {
    let id = request_id(REQUEST_ID_PREFIX);
    let texts = request.input.to_texts();

    if texts.is_empty() {
        return Err(GatewayError::InvalidInput {
            reason: "Input must not be empty".to_string(),
        });
    }
    if texts.len() > MAX_INPUTS {
        return Err(GatewayError::InvalidInput {
            reason: format!("Input array must be {} dimensions or less", MAX_INPUTS),
        });
    }

    info!(
        "Triton embeddings request - model: {}, inputs: {}, format: {:?}, dimensions: {:?}",
        model.name,
        texts.len(),
        request.encoding_format,
        request.dimensions
    );

    let infer = build_infer_request(&model.name, &id, &texts);
    let rows = dispatch_buffered(&ctx.balancer, model, |endpoint| async move {
        let target = endpoint.grpc_target();
        debug!("Using Triton server at {} for model {}", target, endpoint.model);
        let response = ctx
            .triton
            .model_infer(&target, infer, Some(INFER_TIMEOUT))
            .await?;
        Ok::<_, GatewayError>(response.fp32_output(EMBEDDINGS_OUTPUT)?.rows())
    })
    .await
    .map_err(|e| e.with_context("Triton embeddings error"))?;

    check_vectors(&rows, request.dimensions);

    let prompt_tokens = estimate_tokens_batch(&texts);
    let response = EmbeddingResponse::new(
        request.model.clone(),
        to_embedding_objects(rows, request.wants_base64()),
        EmbeddingUsage {
            prompt_tokens,
            total_tokens: prompt_tokens,
        },
    );

    record_usage(
        ctx.usage.as_ref(),
        embeddings_usage_record(&request, &model.name, &id, prompt_tokens),
    );
    info!(
        "Processed Triton embeddings {} - model: {}, inputs: {}, prompt tokens: {}",
        id,
        model.name,
        texts.len(),
        prompt_tokens
    );

    Ok(response)
}
