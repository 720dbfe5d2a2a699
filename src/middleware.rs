use axum::{
    body::Body,
    extract::Request,
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::routers::error::unauthorized;

/// Bearer token presented by the caller, stored as a request extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerToken(pub String);

/// Require `Authorization: Bearer <token>` on the wrapped routes.
///
/// The token is not validated here; it is only carried through so it can be
/// forwarded downstream when a model has no key of its own.
pub async fn bearer_auth_middleware(mut request: Request<Body>, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    let Some(token) = token else {
        debug!(
            "Missing bearer token for {} {}",
            request.method(),
            request.uri().path()
        );
        return unauthorized("missing_api_key", "API key is missing");
    };

    request.extensions_mut().insert(CallerToken(token));
    next.run(request).await
}
