use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ConfigError, ConfigResult, ModelRegistry};

pub const DEFAULT_MODELS_CONFIG: &str = "/workspace/model.yml";
pub const MODELS_CONFIG_ENV: &str = "GATEWAY_MODELS_CONFIG";

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path of the models YAML file
    #[serde(default = "default_models_config")]
    pub models_config: String,
    /// round_robin, random, least_connections or weighted_round_robin
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
    pub log_level: Option<String>,
    pub log_dir: Option<String>,
    #[serde(default)]
    pub log_json: bool,
    /// Loaded from `models_config` by `load_models`
    #[serde(skip)]
    pub models: ModelRegistry,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// `GATEWAY_MODELS_CONFIG` when set, else `/workspace/model.yml`.
pub fn default_models_config() -> String {
    std::env::var(MODELS_CONFIG_ENV)
        .ok()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MODELS_CONFIG.to_string())
}

fn default_strategy() -> String {
    "round_robin".to_string()
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_max_payload_size() -> usize {
    256 * 1024 * 1024 // 256MB
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            models_config: default_models_config(),
            strategy: default_strategy(),
            request_timeout_secs: default_request_timeout_secs(),
            max_payload_size: default_max_payload_size(),
            log_level: None,
            log_dir: None,
            log_json: false,
            models: ModelRegistry::default(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "host".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.max_payload_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_payload_size".to_string(),
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if let Some(level) = &self.log_level {
            let valid = ["trace", "debug", "info", "warn", "warning", "error"];
            if !valid.contains(&level.to_lowercase().as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "log_level".to_string(),
                    value: level.clone(),
                    reason: format!("must be one of: {}", valid.join(", ")),
                });
            }
        }
        Ok(())
    }

    /// Load the models file into `models`.
    ///
    /// A missing file leaves the registry empty so the gateway still starts
    /// and serves its probes; a file that exists but fails to parse or
    /// validate is an error.
    pub fn load_models(&mut self) -> ConfigResult<()> {
        let path = Path::new(&self.models_config);
        if !path.exists() {
            warn!(
                "Models config {} not found, starting with no models",
                self.models_config
            );
            self.models = ModelRegistry::default();
            return Ok(());
        }

        self.models = ModelRegistry::from_file(path)?;
        info!(
            "Loaded {} models from {}",
            self.models.len(),
            self.models_config
        );
        Ok(())
    }

    pub fn with_models(mut self, models: ModelRegistry) -> Self {
        self.models = models;
        self
    }
}
