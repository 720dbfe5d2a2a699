use std::{sync::Arc, time::Duration};

use reqwest::Client;
use tracing::info;

use crate::{
    config::{GatewayConfig, ModelRegistry},
    core::LoadBalancer,
    grpc_client::{GrpcTritonTransport, TritonTransport},
    usage::{TracingUsageRecorder, UsageRecorder},
};

/// Error type for AppContext builder
#[derive(Debug)]
pub struct AppContextBuildError(&'static str);

impl std::fmt::Display for AppContextBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Missing required field: {}", self.0)
    }
}

impl std::error::Error for AppContextBuildError {}

/// Everything a handler needs, shared across requests.
///
/// There is exactly one `LoadBalancer` per context; every dispatch call site
/// reaches it through here.
#[derive(Clone)]
pub struct AppContext {
    pub client: Client,
    pub config: GatewayConfig,
    pub models: Arc<ModelRegistry>,
    pub balancer: Arc<LoadBalancer>,
    pub triton: Arc<dyn TritonTransport>,
    pub usage: Arc<dyn UsageRecorder>,
}

impl AppContext {
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::new()
    }

    /// Create all components from config.
    pub fn from_config(config: GatewayConfig) -> Result<Self, String> {
        let client = build_client(config.request_timeout_secs)?;
        let balancer = Arc::new(LoadBalancer::new(&config.strategy));
        info!(
            "Gateway context ready: {} models, strategy {}",
            config.models.len(),
            balancer.policy_name()
        );

        AppContext::builder()
            .client(client)
            .models(Arc::new(config.models.clone()))
            .balancer(balancer)
            .triton(Arc::new(GrpcTritonTransport::new()))
            .usage(Arc::new(TracingUsageRecorder))
            .config(config)
            .build()
            .map_err(|e| e.to_string())
    }
}

/// HTTP client for OpenAI-protocol backends.
///
/// Backends commonly run with self-signed certificates, so certificate
/// verification is disabled.
pub fn build_client(timeout_secs: u64) -> Result<Client, String> {
    Client::builder()
        .pool_idle_timeout(Some(Duration::from_secs(50)))
        .pool_max_idle_per_host(500)
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {}", e))
}

#[derive(Default)]
pub struct AppContextBuilder {
    client: Option<Client>,
    config: Option<GatewayConfig>,
    models: Option<Arc<ModelRegistry>>,
    balancer: Option<Arc<LoadBalancer>>,
    triton: Option<Arc<dyn TritonTransport>>,
    usage: Option<Arc<dyn UsageRecorder>>,
}

impl AppContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn models(mut self, models: Arc<ModelRegistry>) -> Self {
        self.models = Some(models);
        self
    }

    pub fn balancer(mut self, balancer: Arc<LoadBalancer>) -> Self {
        self.balancer = Some(balancer);
        self
    }

    pub fn triton(mut self, triton: Arc<dyn TritonTransport>) -> Self {
        self.triton = Some(triton);
        self
    }

    pub fn usage(mut self, usage: Arc<dyn UsageRecorder>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn build(self) -> Result<AppContext, AppContextBuildError> {
        let config = self.config.ok_or(AppContextBuildError("config"))?;
        let models = self
            .models
            .unwrap_or_else(|| Arc::new(config.models.clone()));

        Ok(AppContext {
            client: self.client.ok_or(AppContextBuildError("client"))?,
            models,
            balancer: self.balancer.ok_or(AppContextBuildError("balancer"))?,
            triton: self
                .triton
                .unwrap_or_else(|| Arc::new(GrpcTritonTransport::new())),
            usage: self.usage.unwrap_or_else(|| Arc::new(TracingUsageRecorder)),
            config,
        })
    }
}
