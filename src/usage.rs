//! Usage records and token estimation
//!
//! Every successful call emits one `UsageRecord`. Recording is best-effort:
//! a recorder failure is logged and never changes the response.

use std::fmt::Debug;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    Chat,
    Embeddings,
    AudioTranscription,
}

impl ApiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::Chat => "chat",
            ApiType::Embeddings => "embeddings",
            ApiType::AudioTranscription => "audio_transcription",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub api_type: ApiType,
    pub model: String,
    pub request_id: String,
    pub user_id: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub input_count: Option<usize>,
    pub extra: Map<String, Value>,
}

impl UsageRecord {
    pub fn new(
        api_type: ApiType,
        model: impl Into<String>,
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> Self {
        Self {
            api_type,
            model: model.into(),
            request_id: request_id.into(),
            user_id: user_id.into(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            input_count: None,
            extra: Map::new(),
        }
    }

    pub fn with_input_count(mut self, count: usize) -> Self {
        self.input_count = Some(count);
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to record usage: {0}")]
pub struct UsageError(pub String);

/// Sink for usage records.
pub trait UsageRecorder: Send + Sync + Debug {
    fn record(&self, record: UsageRecord) -> Result<(), UsageError>;
}

/// Emits each record as one structured event on the `usage` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageRecorder;

impl UsageRecorder for TracingUsageRecorder {
    fn record(&self, record: UsageRecord) -> Result<(), UsageError> {
        let extra = serde_json::to_string(&record.extra).map_err(|e| UsageError(e.to_string()))?;
        info!(
            target: "usage",
            api_type = record.api_type.as_str(),
            model = %record.model,
            request_id = %record.request_id,
            user_id = %record.user_id,
            prompt_tokens = record.prompt_tokens,
            completion_tokens = record.completion_tokens,
            total_tokens = record.total_tokens,
            input_count = record.input_count,
            extra = %extra,
            "usage recorded"
        );
        Ok(())
    }
}

/// Hand a record to the recorder, swallowing any failure.
pub fn record_usage(recorder: &dyn UsageRecorder, record: UsageRecord) {
    let request_id = record.request_id.clone();
    if let Err(e) = recorder.record(record) {
        warn!("Usage record for {} dropped: {}", request_id, e);
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}')
}

/// Rough token count for text that never went through a tokenizer.
///
/// CJK ideographs count 1.5 tokens each, ASCII letters and digits one token
/// per four, everything else one token per six. Non-empty text is at least
/// one token.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }

    let (mut cjk, mut ascii, mut other) = (0u64, 0u64, 0u64);
    for c in text.chars() {
        if is_cjk(c) {
            cjk += 1;
        } else if c.is_ascii_alphanumeric() {
            ascii += 1;
        } else {
            other += 1;
        }
    }

    let cjk_tokens = cjk * 3 / 2;
    let ascii_tokens = (ascii / 4).max(1);
    let other_tokens = other / 6;

    (cjk_tokens + ascii_tokens + other_tokens).max(1)
}

pub fn estimate_tokens_batch<S: AsRef<str>>(texts: &[S]) -> u64 {
    texts.iter().map(|t| estimate_tokens(t.as_ref())).sum()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens_batch::<&str>(&[]), 0);
    }

    #[test]
    fn test_estimate_tokens_ascii() {
        // 10 alnum -> 2, 1 space -> 0
        assert_eq!(estimate_tokens("hello world"), 2);
        assert_eq!(estimate_tokens("a"), 1);
        // 6 punctuation -> 1, ascii floor of 1
        assert_eq!(estimate_tokens("!!!!!!"), 2);
    }

    #[test]
    fn test_estimate_tokens_cjk() {
        // 4 cjk -> 6, ascii floor 1
        assert_eq!(estimate_tokens("你好世界"), 7);
        // 3 cjk -> 4 (floor of 4.5), ascii floor 1
        assert_eq!(estimate_tokens("語音辨"), 5);
    }

    #[test]
    fn test_estimate_tokens_batch_sums_items() {
        assert_eq!(
            estimate_tokens_batch(&["hello world", "你好世界"]),
            estimate_tokens("hello world") + estimate_tokens("你好世界")
        );
    }

    #[derive(Debug, Default)]
    struct CollectingRecorder {
        records: Mutex<Vec<UsageRecord>>,
    }

    impl UsageRecorder for CollectingRecorder {
        fn record(&self, record: UsageRecord) -> Result<(), UsageError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FailingRecorder;

    impl UsageRecorder for FailingRecorder {
        fn record(&self, _record: UsageRecord) -> Result<(), UsageError> {
            Err(UsageError("database unavailable".to_string()))
        }
    }

    #[test]
    fn test_record_usage_totals_and_extra() {
        let recorder = CollectingRecorder::default();
        let record = UsageRecord::new(ApiType::Chat, "m", "chatcmpl-1", "alice", 10, 5)
            .with_input_count(2)
            .with_extra("finish_reason", "stop");
        record_usage(&recorder, record);

        let records = recorder.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].total_tokens, 15);
        assert_eq!(records[0].extra["finish_reason"], "stop");
    }

    #[test]
    fn test_record_usage_swallows_failures() {
        record_usage(
            &FailingRecorder,
            UsageRecord::new(ApiType::Embeddings, "m", "embd-1", "unknown", 3, 0),
        );
        assert!(TracingUsageRecorder
            .record(UsageRecord::new(ApiType::AudioTranscription, "m", "asr-1", "u", 0, 1))
            .is_ok());
    }
}
