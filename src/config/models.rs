//! Model registry loaded from the models YAML file
//!
//! ```yaml
//! models:
//!   llama-3-8b:
//!     host: [10.0.0.5, 10.0.0.6]
//!     port: 8000
//!     serve_type: chat
//!     source_type: openai:chat
//!     response: {id: llama-3-8b, created: 1700000000, owned_by: infra}
//! ```

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ConfigError, ConfigResult};
use crate::protocols::models::ModelObject;

/// Backend protocol a model is served with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "openai:chat")]
    OpenAiChat,
    #[serde(rename = "openai:responses")]
    OpenAiResponses,
    #[serde(rename = "openai:embeddings")]
    OpenAiEmbeddings,
    #[serde(rename = "openai:audio:transcription")]
    OpenAiAudioTranscription,
    #[serde(rename = "triton:embeddings")]
    TritonEmbeddings,
    #[serde(rename = "triton:audio:transcription")]
    TritonAudioTranscription,
}

impl SourceType {
    pub const ALL: [SourceType; 6] = [
        SourceType::OpenAiChat,
        SourceType::OpenAiResponses,
        SourceType::OpenAiEmbeddings,
        SourceType::OpenAiAudioTranscription,
        SourceType::TritonEmbeddings,
        SourceType::TritonAudioTranscription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::OpenAiChat => "openai:chat",
            SourceType::OpenAiResponses => "openai:responses",
            SourceType::OpenAiEmbeddings => "openai:embeddings",
            SourceType::OpenAiAudioTranscription => "openai:audio:transcription",
            SourceType::TritonEmbeddings => "triton:embeddings",
            SourceType::TritonAudioTranscription => "triton:audio:transcription",
        }
    }

    pub fn is_triton(&self) -> bool {
        matches!(
            self,
            SourceType::TritonEmbeddings | SourceType::TritonAudioTranscription
        )
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "source_type".to_string(),
                value: s.to_string(),
                reason: format!(
                    "must be one of: {}",
                    SourceType::ALL.map(|t| t.as_str()).join(", ")
                ),
            })
    }
}

/// A validated model entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub name: String,
    pub hosts: Vec<String>,
    pub ports: Vec<u16>,
    pub serve_types: Vec<String>,
    pub source_type: SourceType,
    /// Credential sent downstream instead of the caller's token
    pub public_api_key: Option<String>,
    /// Listing entry for `/v1/models`; unlisted when absent
    pub response: Option<ModelObject>,
    pub args: Option<Map<String, Value>>,
}

impl ModelConfig {
    pub fn new(
        name: impl Into<String>,
        hosts: Vec<String>,
        ports: Vec<u16>,
        source_type: SourceType,
    ) -> Self {
        Self {
            name: name.into(),
            hosts,
            ports,
            serve_types: vec![source_type.as_str().to_string()],
            source_type,
            public_api_key: None,
            response: None,
            args: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.public_api_key = Some(key.into());
        self
    }

    pub fn with_response(mut self, response: ModelObject) -> Self {
        self.response = Some(response);
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let field = |suffix: &str| format!("models.{}.{}", self.name, suffix);

        if self.hosts.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: field("host"),
            });
        }
        for (i, host) in self.hosts.iter().enumerate() {
            if host.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field(&format!("host[{}]", i)),
                    value: host.clone(),
                    reason: "host cannot be empty".to_string(),
                });
            }
        }

        if self.ports.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: field("port"),
            });
        }
        if let Some(i) = self.ports.iter().position(|&p| p == 0) {
            return Err(ConfigError::InvalidValue {
                field: field(&format!("port[{}]", i)),
                value: "0".to_string(),
                reason: "port must be between 1 and 65535".to_string(),
            });
        }

        if self.hosts.len() > 1 && self.ports.len() > 1 && self.hosts.len() != self.ports.len()
        {
            return Err(ConfigError::IncompatibleConfig {
                reason: format!(
                    "models.{}: host and port lists must have the same length or one must have length 1, got {} hosts and {} ports",
                    self.name,
                    self.hosts.len(),
                    self.ports.len()
                ),
            });
        }

        if self.serve_types.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: field("serve_type"),
            });
        }

        Ok(())
    }
}

// ============================================================================
// YAML layout
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortSpec {
    Number(i64),
    List(Vec<i64>),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawModelResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    object: Option<String>,
    #[serde(default)]
    owned_by: String,
}

#[derive(Debug, Deserialize)]
struct RawModelConfig {
    #[serde(default)]
    host: Option<OneOrMany<String>>,
    #[serde(default)]
    port: Option<PortSpec>,
    #[serde(default)]
    serve_type: Option<OneOrMany<String>>,
    #[serde(default)]
    source_type: Option<String>,
    #[serde(default)]
    public_api_key: Option<String>,
    #[serde(default)]
    response: Option<RawModelResponse>,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawModelsFile {
    #[serde(default)]
    models: Option<BTreeMap<String, RawModelConfig>>,
}

fn parse_ports(name: &str, spec: Option<PortSpec>) -> ConfigResult<Vec<u16>> {
    let field = format!("models.{}.port", name);
    let raw = match spec {
        None => Vec::new(),
        Some(PortSpec::Number(port)) => vec![port],
        Some(PortSpec::List(ports)) => ports,
        Some(PortSpec::Text(text)) => {
            let port = text.trim().parse::<i64>().map_err(|_| ConfigError::InvalidValue {
                field: field.clone(),
                value: text.clone(),
                reason: "port must be an integer".to_string(),
            })?;
            vec![port]
        }
    };

    raw.into_iter()
        .enumerate()
        .map(|(i, port)| {
            u16::try_from(port)
                .ok()
                .filter(|&p| p > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: format!("{}[{}]", field, i),
                    value: port.to_string(),
                    reason: "port must be between 1 and 65535".to_string(),
                })
        })
        .collect()
}

impl ModelConfig {
    fn from_raw(name: &str, raw: RawModelConfig) -> ConfigResult<Self> {
        let source = raw.source_type.ok_or_else(|| ConfigError::MissingRequired {
            field: format!("models.{}.source_type", name),
        })?;
        let source_type = source.parse::<SourceType>().map_err(|_| ConfigError::InvalidValue {
            field: format!("models.{}.source_type", name),
            value: source.clone(),
            reason: format!(
                "must be one of: {}",
                SourceType::ALL.map(|t| t.as_str()).join(", ")
            ),
        })?;

        let response = raw.response.map(|r| ModelObject {
            id: r.id.unwrap_or_else(|| name.to_string()),
            object: r.object.unwrap_or_else(|| "model".to_string()),
            created: r.created,
            owned_by: r.owned_by,
        });

        let args = match raw.args {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        };

        let config = ModelConfig {
            name: name.to_string(),
            hosts: raw.host.map(OneOrMany::into_vec).unwrap_or_default(),
            ports: parse_ports(name, raw.port)?,
            serve_types: raw
                .serve_type
                .map(OneOrMany::into_vec)
                .unwrap_or_default()
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect(),
            source_type,
            public_api_key: raw.public_api_key.filter(|k| !k.is_empty()),
            response,
            args,
        };
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Configured models, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<ModelConfig>>,
}

impl ModelRegistry {
    pub fn new(models: impl IntoIterator<Item = ModelConfig>) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|m| (m.name.clone(), Arc::new(m)))
                .collect(),
        }
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        Self::parse(content, "<inline>")
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    fn parse(content: &str, origin: &str) -> ConfigResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let file: RawModelsFile =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;

        let models = file
            .models
            .unwrap_or_default()
            .into_iter()
            .map(|(name, raw)| ModelConfig::from_raw(&name, raw))
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self::new(models))
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModelConfig>> {
        self.models.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Listing entries of every model with a `response` block, in name order.
    pub fn model_objects(&self) -> Vec<ModelObject> {
        self.models
            .values()
            .filter_map(|m| m.response.clone())
            .collect()
    }
}
