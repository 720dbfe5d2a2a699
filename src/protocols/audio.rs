use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_RESPONSE_FORMAT: &str = "json";

/// A transcription request assembled from the multipart upload.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub file: Bytes,
    pub file_name: String,
    pub content_type: Option<String>,
    pub model: String,
    pub language: Option<String>,
    pub prompt: Option<String>,
    /// json, text, srt, verbose_json, vtt or diarized_json
    pub response_format: String,
    pub temperature: Option<f32>,
    pub timestamp_granularities: Option<Vec<String>>,
}

impl TranscriptionRequest {
    /// Whether the backend answers with a JSON object rather than raw text.
    pub fn expects_json(&self) -> bool {
        matches!(self.response_format.as_str(), "json" | "verbose_json")
    }
}

/// Split a comma-separated granularity list ("word, segment").
pub fn parse_timestamp_granularities(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionUsage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub usage_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_token_details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TranscriptionUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<Value>>,
}

impl TranscriptionResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            logprobs: None,
        }
    }
}
