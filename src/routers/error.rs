use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use crate::core::GatewayError;

pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::BAD_REQUEST, code, message)
}

pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::NOT_FOUND, code, message)
}

pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::UNAUTHORIZED, code, message)
}

pub fn create_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> Response {
    create_typed_error(status, status_code_to_str(status), Some(code.into()), message)
}

/// Same envelope as `create_error` but with an explicit `type`.
pub fn create_typed_error(
    status: StatusCode,
    error_type: &str,
    code: Option<String>,
    message: impl Into<String>,
) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "message": message.into(),
                "type": error_type,
                "code": code,
            }
        })),
    )
        .into_response()
}

fn status_code_to_str(status_code: StatusCode) -> &'static str {
    match status_code {
        StatusCode::BAD_REQUEST => "bad_request",
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::FORBIDDEN => "forbidden",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::METHOD_NOT_ALLOWED => "method_not_allowed",
        StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
        StatusCode::UNSUPPORTED_MEDIA_TYPE => "unsupported_media_type",
        StatusCode::UNPROCESSABLE_ENTITY => "unprocessable_entity",
        StatusCode::TOO_MANY_REQUESTS => "too_many_requests",
        StatusCode::INTERNAL_SERVER_ERROR => "internal_server_error",
        StatusCode::NOT_IMPLEMENTED => "not_implemented",
        StatusCode::BAD_GATEWAY => "bad_gateway",
        StatusCode::SERVICE_UNAVAILABLE => "service_unavailable",
        StatusCode::GATEWAY_TIMEOUT => "gateway_timeout",
        _ => "unknown_status_code",
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::ModelNotFound { .. } => not_found("model_not_found", "Model not found"),
            GatewayError::InvalidInput { reason } => bad_request("invalid_input", reason),
            GatewayError::InvalidRequest { message } => bad_request("invalid_request", message),
            err @ GatewayError::UnsupportedSourceType { .. } => {
                not_found("unsupported_source_type", err.to_string())
            }
            GatewayError::Downstream {
                kind,
                message,
                code,
            } => {
                warn!("Downstream failure: {}", message);
                create_typed_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    kind.as_str(),
                    code,
                    message,
                )
            }
        }
    }
}
