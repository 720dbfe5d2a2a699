use reqwest::multipart::{Form, Part};
use tracing::{debug, info, warn};

use super::{backend_error, error_message};
use crate::{
    app_context::AppContext,
    config::ModelConfig,
    core::{GatewayError, GatewayResult},
    protocols::{
        audio::{TranscriptionRequest, TranscriptionResponse, TranscriptionUsage},
        UNKNOWN_USER_ID,
    },
    routers::dispatch::{dispatch_buffered, request_id},
    usage::{estimate_tokens, record_usage, ApiType, UsageRecord},
};

pub const REQUEST_ID_PREFIX: &str = "transcribe-";

/// Usage record shared by both transcription backends. Completion tokens
/// come from the backend's usage when it reports them, else from the text.
pub(crate) fn transcription_usage_record(
    request: &TranscriptionRequest,
    request_id: &str,
    text: &str,
    usage: Option<&TranscriptionUsage>,
) -> UsageRecord {
    let completion_tokens = usage
        .and_then(|u| u.output_tokens)
        .unwrap_or_else(|| estimate_tokens(text));

    UsageRecord::new(
        ApiType::AudioTranscription,
        &request.model,
        request_id,
        UNKNOWN_USER_ID,
        0,
        completion_tokens,
    )
    .with_extra("file_name", request.file_name.as_str())
    .with_extra("file_size", request.file.len())
    .with_extra("language", request.language.as_deref())
    .with_extra("response_format", request.response_format.as_str())
    .with_extra("text_length", text.chars().count())
    .with_extra(
        "api_usage",
        usage.and_then(|u| serde_json::to_value(u).ok()),
    )
}

fn build_form(request: &TranscriptionRequest) -> GatewayResult<Form> {
    let mut file = Part::bytes(request.file.to_vec()).file_name(request.file_name.clone());
    if let Some(content_type) = &request.content_type {
        file = file.mime_str(content_type).map_err(|_| GatewayError::InvalidInput {
            reason: format!("Invalid file content type: {}", content_type),
        })?;
    }

    let mut form = Form::new()
        .part("file", file)
        .text("model", request.model.clone())
        .text("response_format", request.response_format.clone());
    if let Some(language) = &request.language {
        form = form.text("language", language.clone());
    }
    if let Some(prompt) = &request.prompt {
        form = form.text("prompt", prompt.clone());
    }
    if let Some(temperature) = request.temperature {
        form = form.text("temperature", temperature.to_string());
    }
    for granularity in request.timestamp_granularities.iter().flatten() {
        form = form.text("timestamp_granularities[]", granularity.clone());
    }
    Ok(form)
}

/// A 400 complaining about `response_format` is the caller's mistake and is
/// reported as such. Every other failure is a downstream error.
pub(crate) fn translate_error(status: u16, body: &str, model: &str) -> GatewayError {
    let unsupported_format = body.contains("response_format")
        && (body.contains("not compatible") || body.contains("not supported"));

    if status == 400 && unsupported_format {
        warn!("Unsupported response_format for model '{}': {}", model, body);
        let message = error_message(body).unwrap_or_else(|| {
            format!(
                "Model '{}' does not support the requested response_format",
                model
            )
        });
        return GatewayError::invalid_request(message);
    }
    backend_error(status, body)
}

/// `json` and `verbose_json` answers are objects; every other format is the
/// raw transcript.
pub(crate) fn parse_transcription(
    request: &TranscriptionRequest,
    body: &str,
) -> GatewayResult<TranscriptionResponse> {
    if request.expects_json() {
        Ok(serde_json::from_str(body)?)
    } else {
        Ok(TranscriptionResponse::text(body))
    }
}

pub async fn create_transcription(
    ctx: &AppContext,
    model: &ModelConfig,
    api_key: &str,
    request: TranscriptionRequest,
) -> GatewayResult<TranscriptionResponse> {
    let id = request_id(REQUEST_ID_PREFIX);
    debug!(
        "Transcription {} for model {}: file={}, size={} bytes",
        id,
        model.name,
        request.file_name,
        request.file.len()
    );

    let req = &request;
    let response = dispatch_buffered(&ctx.balancer, model, |endpoint| async move {
        let upstream = ctx
            .client
            .post(endpoint.url("/v1/audio/transcriptions"))
            .bearer_auth(api_key)
            .multipart(build_form(req)?)
            .send()
            .await?;

        let status = upstream.status();
        let body = upstream.text().await?;
        if !status.is_success() {
            return Err(translate_error(status.as_u16(), &body, &model.name));
        }
        parse_transcription(req, &body)
    })
    .await
    .map_err(|e| e.with_context("Audio transcription API error"))?;

    record_usage(
        ctx.usage.as_ref(),
        transcription_usage_record(&request, &id, &response.text, response.usage.as_ref()),
    );
    info!(
        "Transcription successful - model: {}, file: {}, text length: {}",
        model.name,
        request.file_name,
        response.text.chars().count()
    );

    Ok(response)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::protocols::audio::DEFAULT_RESPONSE_FORMAT;

    fn request(format: &str) -> TranscriptionRequest {
        TranscriptionRequest {
            file: Bytes::from_static(b"RIFF0000WAVE"),
            file_name: "clip.wav".to_string(),
            content_type: Some("audio/wav".to_string()),
            model: "whisper".to_string(),
            language: Some("en".to_string()),
            prompt: None,
            response_format: format.to_string(),
            temperature: None,
            timestamp_granularities: None,
        }
    }

    #[test]
    fn test_unsupported_format_becomes_invalid_request() {
        let body = r#"{"error":{"message":"response_format 'srt' is not supported for this model","type":"invalid_request_error"}}"#;
        match translate_error(400, body, "whisper") {
            GatewayError::InvalidRequest { message } => {
                assert_eq!(message, "response_format 'srt' is not supported for this model")
            }
            other => panic!("unexpected error: {other:?}"),
        }

        match translate_error(400, "response_format vtt not compatible", "whisper") {
            GatewayError::InvalidRequest { message } => assert_eq!(
                message,
                "Model 'whisper' does not support the requested response_format"
            ),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_other_errors_stay_downstream() {
        assert!(matches!(
            translate_error(400, r#"{"error":{"message":"file too short"}}"#, "whisper"),
            GatewayError::Downstream { .. }
        ));
        assert!(matches!(
            translate_error(500, "response_format not supported", "whisper"),
            GatewayError::Downstream { .. }
        ));
    }

    #[test]
    fn test_parse_transcription_by_format() {
        let parsed = parse_transcription(
            &request(DEFAULT_RESPONSE_FORMAT),
            r#"{"text":"hello","usage":{"type":"tokens","output_tokens":4}}"#,
        )
        .unwrap();
        assert_eq!(parsed.text, "hello");
        assert_eq!(parsed.usage.unwrap().output_tokens, Some(4));

        let parsed = parse_transcription(&request("srt"), "1\n00:00:00,000 --> 00:00:01,000\nhello\n").unwrap();
        assert!(parsed.text.contains("hello"));
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn test_usage_record_prefers_backend_tokens() {
        let req = request("json");
        let usage = TranscriptionUsage {
            output_tokens: Some(11),
            ..Default::default()
        };
        let record = transcription_usage_record(&req, "transcribe-1", "hello world", Some(&usage));
        assert_eq!(record.completion_tokens, 11);
        assert_eq!(record.prompt_tokens, 0);
        assert_eq!(record.extra["file_size"], 12);
        assert_eq!(record.extra["text_length"], 11);

        let record = transcription_usage_record(&req, "transcribe-1", "hello world", None);
        assert_eq!(record.completion_tokens, estimate_tokens("hello world"));
        assert!(record.extra["api_usage"].is_null());
    }

    #[test]
    fn test_build_form_accepts_content_type() {
        assert!(build_form(&request("json")).is_ok());

        let mut bad = request("json");
        bad.content_type = Some("not a mime".to_string());
        assert!(matches!(
            build_form(&bad),
            Err(GatewayError::InvalidInput { .. })
        ));
    }
}
