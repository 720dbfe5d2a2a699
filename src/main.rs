use anyhow::Context;
use clap::Parser;
use inference_gateway::{
    config::{default_models_config, GatewayConfig},
    observability::{logging::parse_level, init_logging, LoggingConfig},
    server,
};
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "inference-gateway")]
#[command(about = "OpenAI-compatible gateway for OpenAI-protocol and Triton backends")]
struct CliArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Models YAML file. Defaults to $GATEWAY_MODELS_CONFIG, then /workspace/model.yml
    #[arg(long)]
    models_config: Option<String>,

    /// round_robin, random, least_connections or weighted_round_robin
    #[arg(long, default_value = "round_robin")]
    strategy: String,

    /// Timeout for downstream HTTP requests
    #[arg(long, default_value_t = 600)]
    request_timeout_secs: u64,

    #[arg(long, default_value_t = 256 * 1024 * 1024)]
    max_payload_size: usize,

    /// trace, debug, info, warn or error
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write daily-rotated log files here
    #[arg(long)]
    log_dir: Option<String>,

    #[arg(long, default_value_t = false)]
    log_json: bool,
}

impl CliArgs {
    fn into_config(self) -> GatewayConfig {
        GatewayConfig {
            host: self.host,
            port: self.port,
            models_config: self.models_config.unwrap_or_else(default_models_config),
            strategy: self.strategy,
            request_timeout_secs: self.request_timeout_secs,
            max_payload_size: self.max_payload_size,
            log_level: Some(self.log_level),
            log_dir: self.log_dir,
            log_json: self.log_json,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = CliArgs::parse().into_config();

    let level = config.log_level.as_deref().and_then(parse_level);
    let _log_guard = init_logging(LoggingConfig {
        level: level.unwrap_or(Level::INFO),
        json: config.log_json,
        log_dir: config.log_dir.clone(),
    });
    if level.is_none() {
        warn!(
            "Invalid log level '{}', defaulting to info",
            config.log_level.as_deref().unwrap_or_default()
        );
        config.log_level = None;
    }

    config
        .load_models()
        .with_context(|| format!("failed to load models from {}", config.models_config))?;

    info!(
        "Starting inference gateway {} on {}:{} with {} models",
        env!("CARGO_PKG_VERSION"),
        config.host,
        config.port,
        config.models.len()
    );
    server::startup(config).await
}
