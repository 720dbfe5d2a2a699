//! Shared dispatch helpers
//!
//! Every adapter resolves a model, picks an endpoint through the injected
//! `LoadBalancer` and wraps the downstream call in a `RequestGuard`. The
//! helpers here keep that sequence identical across protocols.

use std::{future::Future, sync::Arc};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::{ModelConfig, ModelRegistry, SourceType},
    core::{GatewayError, GatewayResult, LoadBalancer, ModelEndpoint, RequestGuard},
    protocols::UNKNOWN_USER_ID,
};

/// Credential sent when neither the model nor the caller supplies one.
pub const DUMMY_API_KEY: &str = "dummy-key";

/// `prefix` followed by the first 32 characters of a fresh UUID v4.
pub fn request_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().to_string();
    format!("{}{}", prefix, &uuid[..32])
}

/// The credential presented downstream: the model's own key, then the
/// caller's bearer token, then the placeholder.
pub fn resolve_api_key(model: &ModelConfig, caller_token: &str) -> String {
    model
        .public_api_key
        .as_deref()
        .filter(|key| !key.is_empty())
        .or_else(|| Some(caller_token).filter(|token| !token.is_empty()))
        .unwrap_or(DUMMY_API_KEY)
        .to_string()
}

pub fn user_id(user: Option<&str>) -> String {
    user.filter(|u| !u.is_empty())
        .unwrap_or(UNKNOWN_USER_ID)
        .to_string()
}

/// Look up a model and check that it is served by one of `accepted`.
pub fn resolve_model(
    registry: &ModelRegistry,
    name: &str,
    accepted: &[SourceType],
) -> GatewayResult<Arc<ModelConfig>> {
    let model = registry.get(name).ok_or_else(|| {
        warn!("Model not found: {}", name);
        GatewayError::ModelNotFound {
            model: name.to_string(),
        }
    })?;

    if !accepted.contains(&model.source_type) {
        return Err(GatewayError::UnsupportedSourceType {
            model: name.to_string(),
            source_type: model.source_type.to_string(),
        });
    }
    Ok(model)
}

/// Select an endpoint for `model` and open its accounting guard.
pub fn acquire(balancer: &Arc<LoadBalancer>, model: &ModelConfig) -> GatewayResult<RequestGuard> {
    let endpoint = balancer.select_endpoint(&model.hosts, &model.ports, &model.name)?;
    debug!("Dispatching {} to {}", model.name, endpoint);
    Ok(RequestGuard::start(balancer.clone(), endpoint))
}

/// Run one buffered downstream call under a request guard.
///
/// The call is marked successful only when `call` returns `Ok`, which
/// includes translating the backend payload. Errors, panics and
/// cancellation all record a failure.
pub async fn dispatch_buffered<T, F, Fut>(
    balancer: &Arc<LoadBalancer>,
    model: &ModelConfig,
    call: F,
) -> GatewayResult<T>
where
    F: FnOnce(ModelEndpoint) -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let guard = acquire(balancer, model)?;
    match call(guard.endpoint().clone()).await {
        Ok(value) => {
            guard.succeed();
            Ok(value)
        }
        Err(err) => {
            warn!(
                "Request to {} for model {} failed: {}",
                guard.endpoint(),
                model.name,
                err
            );
            guard.fail();
            Err(err)
        }
    }
}
