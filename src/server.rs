use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio::signal;
use tracing::{error, info};

use crate::{
    app_context::AppContext,
    config::{GatewayConfig, SourceType},
    core::{GatewayError, GatewayResult},
    middleware::{bearer_auth_middleware, CallerToken},
    protocols::{
        audio::{parse_timestamp_granularities, TranscriptionRequest, DEFAULT_RESPONSE_FORMAT},
        chat::ChatCompletionRequest,
        embeddings::EmbeddingRequest,
        models::ModelList,
        responses::ResponsesRequest,
    },
    routers::{
        dispatch::{resolve_api_key, resolve_model},
        error::not_found,
        openai, triton,
    },
};

const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<AppContext>,
}

async fn sink_handler() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

async fn root() -> Response {
    Json(json!({
        "service": SERVICE_NAME,
        "version": VERSION,
        "message": "OpenAI-compatible inference gateway",
    }))
    .into_response()
}

async fn liveness() -> Response {
    (StatusCode::OK, "OK").into_response()
}

async fn readiness(State(state): State<Arc<AppState>>) -> Response {
    let models = state.context.models.len();
    if models > 0 {
        (
            StatusCode::OK,
            Json(json!({"status": "ready", "models": models})),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not ready", "reason": "no models configured"})),
        )
            .into_response()
    }
}

async fn health() -> Response {
    Json(json!({
        "status": "healthy",
        "version": VERSION,
        "service": SERVICE_NAME,
    }))
    .into_response()
}

async fn v1_models(State(state): State<Arc<AppState>>) -> Response {
    let data = state.context.models.model_objects();
    if data.is_empty() {
        return not_found("model_not_found", "No models available");
    }
    Json(ModelList::new(data)).into_response()
}

async fn v1_chat_completions(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<CallerToken>,
    Json(body): Json<ChatCompletionRequest>,
) -> Response {
    let ctx = &state.context;
    let model = match resolve_model(&ctx.models, &body.model, &[SourceType::OpenAiChat]) {
        Ok(model) => model,
        Err(e) => return e.into_response(),
    };
    let api_key = resolve_api_key(&model, &token.0);

    if body.stream {
        openai::chat::chat_completion_stream(ctx, &model, &api_key, body).into_response()
    } else {
        openai::chat::chat_completion(ctx, &model, &api_key, body)
            .await
            .map(Json)
            .into_response()
    }
}

async fn v1_responses(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<CallerToken>,
    Json(body): Json<ResponsesRequest>,
) -> Response {
    let ctx = &state.context;
    let model = match resolve_model(&ctx.models, &body.model, &[SourceType::OpenAiResponses]) {
        Ok(model) => model,
        Err(e) => return e.into_response(),
    };
    let api_key = resolve_api_key(&model, &token.0);

    if body.is_stream() {
        openai::responses::create_response_stream(ctx, &model, &api_key, body).into_response()
    } else {
        openai::responses::create_response(ctx, &model, &api_key, body)
            .await
            .map(Json)
            .into_response()
    }
}

async fn v1_embeddings(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<CallerToken>,
    Json(body): Json<EmbeddingRequest>,
) -> Response {
    let ctx = &state.context;
    let model = match resolve_model(
        &ctx.models,
        &body.model,
        &[SourceType::OpenAiEmbeddings, SourceType::TritonEmbeddings],
    ) {
        Ok(model) => model,
        Err(e) => return e.into_response(),
    };

    let result = if model.source_type.is_triton() {
        triton::embeddings::create_embeddings(ctx, &model, body).await
    } else {
        let api_key = resolve_api_key(&model, &token.0);
        openai::embeddings::create_embeddings(ctx, &model, &api_key, body).await
    };
    result.map(Json).into_response()
}

async fn v1_audio_transcriptions(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<CallerToken>,
    mut multipart: Multipart,
) -> Response {
    let request = match read_transcription_form(&mut multipart).await {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let ctx = &state.context;
    let model = match resolve_model(
        &ctx.models,
        &request.model,
        &[
            SourceType::OpenAiAudioTranscription,
            SourceType::TritonAudioTranscription,
        ],
    ) {
        Ok(model) => model,
        Err(e) => return e.into_response(),
    };

    let result = if model.source_type.is_triton() {
        triton::audio::create_transcription(ctx, &model, request).await
    } else {
        let api_key = resolve_api_key(&model, &token.0);
        openai::audio::create_transcription(ctx, &model, &api_key, request).await
    };
    result.map(Json).into_response()
}

fn form_error(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::InvalidInput {
        reason: format!("Invalid multipart body: {}", e),
    }
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> GatewayResult<Option<String>> {
    let text = field.text().await.map_err(form_error)?;
    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

/// Assemble a transcription request from the multipart upload.
async fn read_transcription_form(multipart: &mut Multipart) -> GatewayResult<TranscriptionRequest> {
    let mut file: Option<(Bytes, Option<String>, Option<String>)> = None;
    let mut model = None;
    let mut language = None;
    let mut prompt = None;
    let mut response_format = None;
    let mut temperature = None;
    let mut granularities: Vec<String> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().map(String::from);
                let content_type = field.content_type().map(String::from);
                let data = field.bytes().await.map_err(form_error)?;
                file = Some((data, file_name, content_type));
            }
            "model" => model = read_text(field).await?,
            "language" => language = read_text(field).await?,
            "prompt" => prompt = read_text(field).await?,
            "response_format" => response_format = read_text(field).await?,
            "temperature" => {
                if let Some(raw) = read_text(field).await? {
                    let value = raw.parse::<f32>().map_err(|_| GatewayError::InvalidInput {
                        reason: format!("temperature must be a number, got '{}'", raw),
                    })?;
                    temperature = Some(value);
                }
            }
            "timestamp_granularities" | "timestamp_granularities[]" => {
                if let Some(raw) = read_text(field).await? {
                    granularities.extend(parse_timestamp_granularities(&raw));
                }
            }
            _ => {}
        }
    }

    let (data, file_name, content_type) = match file {
        Some((data, Some(file_name), content_type)) if !file_name.is_empty() => {
            (data, file_name, content_type)
        }
        _ => {
            return Err(GatewayError::InvalidInput {
                reason: "No file provided".to_string(),
            })
        }
    };
    let model = model.ok_or_else(|| GatewayError::InvalidInput {
        reason: "model is required".to_string(),
    })?;

    Ok(TranscriptionRequest {
        file: data,
        file_name,
        content_type,
        model,
        language,
        prompt,
        response_format: response_format.unwrap_or_else(|| DEFAULT_RESPONSE_FORMAT.to_string()),
        temperature,
        timestamp_granularities: (!granularities.is_empty()).then_some(granularities),
    })
}

#[derive(Debug, Deserialize)]
struct ModelQuery {
    model: Option<String>,
}

async fn load_balancer_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ModelQuery>,
) -> Response {
    let balancer = &state.context.balancer;
    let stats = match &query.model {
        Some(model) => json!(BTreeMap::from([(model.clone(), balancer.get_stats(model))])),
        None => json!(balancer.get_all_stats()),
    };
    Json(json!({
        "strategy": balancer.policy_name(),
        "stats": stats,
    }))
    .into_response()
}

async fn load_balancer_reset(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ModelQuery>,
) -> Response {
    state.context.balancer.reset_stats(query.model.as_deref());
    info!(
        "Load balancer stats reset for {}",
        query.model.as_deref().unwrap_or("all models")
    );
    Json(json!({
        "status": "ok",
        "model": query.model,
    }))
    .into_response()
}

pub fn build_app(app_state: Arc<AppState>, max_payload_size: usize) -> Router {
    let protected_routes = Router::new()
        .route("/v1/chat/completions", post(v1_chat_completions))
        .route("/v1/embeddings", post(v1_embeddings))
        .route("/v1/audio/transcriptions", post(v1_audio_transcriptions))
        .route("/v1/responses", post(v1_responses))
        .route("/v1/models", get(v1_models))
        .route_layer(axum::middleware::from_fn(bearer_auth_middleware));

    let public_routes = Router::new()
        .route("/", get(root))
        .route("/liveness", get(liveness))
        .route("/readiness", get(readiness))
        .route("/health", get(health));

    let admin_routes = Router::new()
        .route("/admin/load_balancer/stats", get(load_balancer_stats))
        .route("/admin/load_balancer/reset", post(load_balancer_reset))
        .route_layer(axum::middleware::from_fn(bearer_auth_middleware));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .merge(admin_routes)
        .layer(axum::extract::DefaultBodyLimit::max(max_payload_size))
        .fallback(sink_handler)
        .with_state(app_state)
}

pub async fn startup(config: GatewayConfig) -> anyhow::Result<()> {
    config.validate()?;

    let addr = format!("{}:{}", config.host, config.port);
    let max_payload_size = config.max_payload_size;
    let context = AppContext::from_config(config).map_err(anyhow::Error::msg)?;
    let app_state = Arc::new(AppState {
        context: Arc::new(context),
    });
    let app = build_app(app_state, max_payload_size);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting gateway on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
