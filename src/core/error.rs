//! Error types for the gateway core
//!
//! Every failure surfaced by a dispatch call site is one of these variants.
//! Transport and translation failures all collapse into `Downstream` so
//! callers have a single shape to handle regardless of the backend protocol.

use crate::grpc_client::TritonError;

/// Classification of a downstream failure, used for the error `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The backend answered with an API-level error.
    Api,
    /// Anything else: transport, decoding or translation failure.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Api => "api_error",
            FailureKind::Internal => "internal_error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("Model {model} has unsupported source type for this endpoint: {source_type}")]
    UnsupportedSourceType { model: String, source_type: String },

    #[error("{message}")]
    Downstream {
        kind: FailureKind,
        message: String,
        code: Option<String>,
    },
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn downstream(message: impl Into<String>) -> Self {
        GatewayError::Downstream {
            kind: FailureKind::Internal,
            message: message.into(),
            code: None,
        }
    }

    pub fn api(message: impl Into<String>, code: Option<String>) -> Self {
        GatewayError::Downstream {
            kind: FailureKind::Api,
            message: message.into(),
            code,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        GatewayError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Prefix a downstream failure message with the operation that failed.
    pub fn with_context(self, context: &str) -> Self {
        match self {
            GatewayError::Downstream {
                kind,
                message,
                code,
            } => GatewayError::Downstream {
                kind,
                message: format!("{}: {}", context, message),
                code,
            },
            other => other,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let message = match err.url() {
            Some(url) => format!("request to {} failed: {}", url, err),
            None => err.to_string(),
        };
        GatewayError::downstream(message)
    }
}

impl From<TritonError> for GatewayError {
    fn from(err: TritonError) -> Self {
        match err {
            TritonError::Rpc { ref status } => GatewayError::api(
                err.to_string(),
                Some(format!("{:?}", status.code()).to_lowercase()),
            ),
            other => GatewayError::downstream(other.to_string()),
        }
    }
}

impl From<tonic::Status> for GatewayError {
    fn from(status: tonic::Status) -> Self {
        TritonError::Rpc { status }.into()
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::downstream(format!("invalid backend payload: {}", err))
    }
}
