// Shared helpers for integration tests
#![allow(dead_code)]

pub mod mock_backend;
pub mod mock_triton;

use std::sync::{Arc, Mutex};

use axum::{body::Body, http::Request, Router};
use inference_gateway::{
    app_context::{build_client, AppContext},
    config::{GatewayConfig, ModelConfig, ModelRegistry},
    core::LoadBalancer,
    grpc_client::TritonTransport,
    server::{build_app, AppState},
    usage::{UsageError, UsageRecord, UsageRecorder},
};

pub const TEST_TOKEN: &str = "sk-caller";

/// Recorder that keeps every record for inspection.
#[derive(Debug, Default)]
pub struct CollectingRecorder {
    records: Mutex<Vec<UsageRecord>>,
}

impl CollectingRecorder {
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl UsageRecorder for CollectingRecorder {
    fn record(&self, record: UsageRecord) -> Result<(), UsageError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

pub struct TestApp {
    pub app: Router,
    pub context: Arc<AppContext>,
    pub usage: Arc<CollectingRecorder>,
}

impl TestApp {
    pub fn new(models: Vec<ModelConfig>) -> Self {
        Self::build(models, None)
    }

    pub fn with_triton(models: Vec<ModelConfig>, triton: Arc<dyn TritonTransport>) -> Self {
        Self::build(models, Some(triton))
    }

    fn build(models: Vec<ModelConfig>, triton: Option<Arc<dyn TritonTransport>>) -> Self {
        let config = GatewayConfig::default().with_models(ModelRegistry::new(models));
        let usage = Arc::new(CollectingRecorder::default());

        let mut builder = AppContext::builder()
            .client(build_client(30).unwrap())
            .balancer(Arc::new(LoadBalancer::new("round_robin")))
            .usage(usage.clone())
            .config(config);
        if let Some(triton) = triton {
            builder = builder.triton(triton);
        }
        let context = Arc::new(builder.build().unwrap());

        let state = Arc::new(AppState {
            context: context.clone(),
        });
        Self {
            app: build_app(state, 16 * 1024 * 1024),
            context,
            usage,
        }
    }
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", TEST_TOKEN))
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

/// A multipart upload with one audio file and the given text fields.
pub fn multipart_request(uri: &str, file: &[u8], fields: &[(&str, &str)]) -> Request<Body> {
    let boundary = "gateway-test-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"clip.wav\"\r\nContent-Type: audio/wav\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .header("authorization", format!("Bearer {}", TEST_TOKEN))
        .body(Body::from(body))
        .unwrap()
}
