use tracing::{debug, info, warn};

use crate::{
    app_context::AppContext,
    config::ModelConfig,
    core::{GatewayError, GatewayResult},
    grpc_client::{triton_proto::ModelInferRequest, TritonError},
    protocols::audio::{TranscriptionRequest, TranscriptionResponse, TranscriptionUsage},
    routers::{
        dispatch::{dispatch_buffered, request_id},
        openai::audio::transcription_usage_record,
    },
    usage::{estimate_tokens, record_usage},
};

pub const REQUEST_ID_PREFIX: &str = "asr-";
const AUDIO_INPUT: &str = "input_audio";
const TEXT_OUTPUT: &str = "output_text";
/// Assumed average byte rate of compressed audio uploads
const BYTES_PER_SECOND: f64 = 16000.0;

/// The model takes only the audio bytes; note every option it will ignore.
fn warn_ignored_options(request: &TranscriptionRequest) {
    if let Some(language) = &request.language {
        warn!(
            "Language parameter '{}' specified but not supported by the model",
            language
        );
    }
    if request.prompt.is_some() {
        warn!("Prompt parameter specified but not supported by the model");
    }
    if let Some(temperature) = request.temperature.filter(|t| *t != 0.0) {
        warn!(
            "Temperature parameter {} specified but not supported by the model",
            temperature
        );
    }
    if matches!(request.response_format.as_str(), "verbose_json" | "diarized_json") {
        warn!(
            "Response format '{}' requested but only plain text output is supported",
            request.response_format
        );
    }
}

pub(crate) fn estimated_seconds(audio_len: usize) -> f64 {
    let seconds = audio_len as f64 / BYTES_PER_SECOND;
    (seconds * 100.0).round() / 100.0
}

pub(crate) fn transcription_usage(text: &str, audio_len: usize) -> TranscriptionUsage {
    let output_tokens = estimate_tokens(text);
    TranscriptionUsage {
        usage_type: Some("audio_transcription".to_string()),
        input_tokens: Some(0),
        input_token_details: None,
        output_tokens: Some(output_tokens),
        total_tokens: Some(output_tokens),
        seconds: Some(estimated_seconds(audio_len)),
    }
}

pub async fn create_transcription(
    ctx: &AppContext,
    model: &ModelConfig,
    request: TranscriptionRequest,
) -> GatewayResult<TranscriptionResponse> {
    let id = request_id(REQUEST_ID_PREFIX);

    if request.file.is_empty() {
        return Err(GatewayError::InvalidInput {
            reason: "Received empty audio data".to_string(),
        });
    }

    info!(
        "Triton audio transcription request - model: {}, format: {}, language: {:?}",
        model.name, request.response_format, request.language
    );
    warn_ignored_options(&request);

    let infer = ModelInferRequest::new(&model.name, &id)
        .with_bytes_input(AUDIO_INPUT, vec![1], &[&request.file[..]])
        .with_output(TEXT_OUTPUT);

    let text = dispatch_buffered(&ctx.balancer, model, |endpoint| async move {
        let target = endpoint.grpc_target();
        debug!("Using Triton server at {} for model {}", target, endpoint.model);
        let response = ctx.triton.model_infer(&target, infer, None).await?;

        let first = response
            .bytes_output(TEXT_OUTPUT)?
            .into_iter()
            .next()
            .unwrap_or_default();
        String::from_utf8(first).map_err(|e| {
            GatewayError::from(TritonError::Decode {
                name: TEXT_OUTPUT.to_string(),
                reason: e.to_string(),
            })
        })
    })
    .await
    .map_err(|e| e.with_context("Triton audio transcription error"))?;

    let usage = transcription_usage(&text, request.file.len());
    record_usage(
        ctx.usage.as_ref(),
        transcription_usage_record(&request, &id, &text, Some(&usage)),
    );
    info!(
        "Processed Triton audio transcription {} - model: {}, text length: {}",
        id,
        model.name,
        text.chars().count()
    );

    Ok(TranscriptionResponse {
        text,
        usage: Some(usage),
        logprobs: None,
    })
}
