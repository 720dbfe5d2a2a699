use serde::{Deserialize, Serialize};

/// Input can be a string, array of strings, tokens, or batches of tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Text(String),
    Texts(Vec<String>),
    Tokens(Vec<i64>),
    TokenBatches(Vec<Vec<i64>>),
}

impl EmbeddingInput {
    /// Number of separate inputs to embed.
    pub fn len(&self) -> usize {
        match self {
            EmbeddingInput::Text(_) => 1,
            EmbeddingInput::Texts(texts) => texts.len(),
            EmbeddingInput::Tokens(tokens) => tokens.len(),
            EmbeddingInput::TokenBatches(batches) => batches.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inputs as text. Token ids are rendered as their decimal form, one
    /// string per id, or one bracketed list per batch.
    pub fn to_texts(&self) -> Vec<String> {
        match self {
            EmbeddingInput::Text(text) => vec![text.clone()],
            EmbeddingInput::Texts(texts) => texts.clone(),
            EmbeddingInput::Tokens(tokens) => tokens.iter().map(|t| t.to_string()).collect(),
            EmbeddingInput::TokenBatches(batches) => {
                batches.iter().map(|batch| format!("{:?}", batch)).collect()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// ID of the model to use
    pub model: String,

    pub input: EmbeddingInput,

    /// Optional encoding format ("float" or "base64")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,

    /// Optional number of dimensions for the embedding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,

    /// Optional user identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl EmbeddingRequest {
    pub fn wants_base64(&self) -> bool {
        self.encoding_format.as_deref() == Some("base64")
    }
}

/// A float vector, or its little-endian f32 bytes base64 encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingVector {
    Float(Vec<f32>),
    Base64(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingObject {
    pub object: String, // "embedding"
    pub embedding: EmbeddingVector,
    pub index: u32,
}

impl EmbeddingObject {
    pub fn new(index: u32, embedding: EmbeddingVector) -> Self {
        Self {
            object: "embedding".to_string(),
            embedding,
            index,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub object: String, // "list"
    pub data: Vec<EmbeddingObject>,
    pub model: String,
    #[serde(default)]
    pub usage: EmbeddingUsage,
}

impl EmbeddingResponse {
    pub fn new(model: impl Into<String>, data: Vec<EmbeddingObject>, usage: EmbeddingUsage) -> Self {
        Self {
            object: "list".to_string(),
            data,
            model: model.into(),
            usage,
        }
    }
}
