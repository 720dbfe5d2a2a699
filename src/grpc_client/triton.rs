use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use http::uri::PathAndQuery;
use tonic::{client::Grpc, codec::ProstCodec, transport::Channel};
use tracing::debug;

use proto::{
    InferInputTensor, InferOutputTensor, InferRequestedOutputTensor, ModelInferRequest,
    ModelInferResponse,
};

/// Messages of the KServe v2 `GRPCInferenceService` used by the gateway.
///
/// Only the fields needed for `ModelInfer` with BYTES inputs and BYTES/FP32
/// outputs are declared; prost skips the rest when decoding.
pub mod proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ModelInferRequest {
        #[prost(string, tag = "1")]
        pub model_name: String,
        #[prost(string, tag = "2")]
        pub model_version: String,
        #[prost(string, tag = "3")]
        pub id: String,
        #[prost(message, repeated, tag = "5")]
        pub inputs: Vec<InferInputTensor>,
        #[prost(message, repeated, tag = "6")]
        pub outputs: Vec<InferRequestedOutputTensor>,
        #[prost(bytes = "vec", repeated, tag = "7")]
        pub raw_input_contents: Vec<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InferInputTensor {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub datatype: String,
        #[prost(int64, repeated, tag = "3")]
        pub shape: Vec<i64>,
        #[prost(message, optional, tag = "5")]
        pub contents: Option<InferTensorContents>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InferRequestedOutputTensor {
        #[prost(string, tag = "1")]
        pub name: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ModelInferResponse {
        #[prost(string, tag = "1")]
        pub model_name: String,
        #[prost(string, tag = "2")]
        pub model_version: String,
        #[prost(string, tag = "3")]
        pub id: String,
        #[prost(message, repeated, tag = "5")]
        pub outputs: Vec<InferOutputTensor>,
        #[prost(bytes = "vec", repeated, tag = "6")]
        pub raw_output_contents: Vec<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InferOutputTensor {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub datatype: String,
        #[prost(int64, repeated, tag = "3")]
        pub shape: Vec<i64>,
        #[prost(message, optional, tag = "5")]
        pub contents: Option<InferTensorContents>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InferTensorContents {
        #[prost(bool, repeated, tag = "1")]
        pub bool_contents: Vec<bool>,
        #[prost(int32, repeated, tag = "2")]
        pub int_contents: Vec<i32>,
        #[prost(int64, repeated, tag = "3")]
        pub int64_contents: Vec<i64>,
        #[prost(float, repeated, tag = "6")]
        pub fp32_contents: Vec<f32>,
        #[prost(double, repeated, tag = "7")]
        pub fp64_contents: Vec<f64>,
        #[prost(bytes = "vec", repeated, tag = "8")]
        pub bytes_contents: Vec<Vec<u8>>,
    }
}

const MODEL_INFER_PATH: &str = "/inference.GRPCInferenceService/ModelInfer";
const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TritonError {
    #[error("Failed to connect to Triton server at {target}: {message}")]
    Connect { target: String, message: String },

    #[error("Triton inference error: {}", status.message())]
    Rpc { status: tonic::Status },

    #[error("Output tensor '{name}' missing from Triton response")]
    MissingOutput { name: String },

    #[error("Failed to decode output tensor '{name}': {reason}")]
    Decode { name: String, reason: String },
}

/// A dense FP32 output tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Fp32Tensor {
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

impl Fp32Tensor {
    /// Split the tensor into rows along its last dimension.
    ///
    /// A 1-D tensor is a single row.
    pub fn rows(&self) -> Vec<Vec<f32>> {
        let width = match self.shape.last() {
            Some(&dim) if dim > 0 && self.shape.len() > 1 => dim as usize,
            _ => self.data.len().max(1),
        };
        self.data.chunks(width).map(<[f32]>::to_vec).collect()
    }
}

impl ModelInferRequest {
    pub fn new(model_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    /// Append a BYTES input tensor. Elements are serialized into
    /// `raw_input_contents` as 4-byte little-endian length prefixes followed
    /// by the element bytes.
    pub fn with_bytes_input<T: AsRef<[u8]>>(
        mut self,
        name: &str,
        shape: Vec<i64>,
        elements: &[T],
    ) -> Self {
        self.inputs.push(InferInputTensor {
            name: name.to_string(),
            datatype: "BYTES".to_string(),
            shape,
            contents: None,
        });
        self.raw_input_contents.push(serialize_bytes_tensor(elements));
        self
    }

    pub fn with_output(mut self, name: &str) -> Self {
        self.outputs.push(InferRequestedOutputTensor {
            name: name.to_string(),
        });
        self
    }
}

impl ModelInferResponse {
    fn output(&self, name: &str) -> Result<(usize, &InferOutputTensor), TritonError> {
        self.outputs
            .iter()
            .enumerate()
            .find(|(_, output)| output.name == name)
            .ok_or_else(|| TritonError::MissingOutput {
                name: name.to_string(),
            })
    }

    /// Decode a BYTES output tensor into its elements.
    pub fn bytes_output(&self, name: &str) -> Result<Vec<Vec<u8>>, TritonError> {
        let (index, output) = self.output(name)?;
        if let Some(raw) = self.raw_output_contents.get(index) {
            return deserialize_bytes_tensor(name, raw);
        }
        match &output.contents {
            Some(contents) => Ok(contents.bytes_contents.clone()),
            None => Err(TritonError::Decode {
                name: name.to_string(),
                reason: "tensor has no contents".to_string(),
            }),
        }
    }

    /// Decode an FP32 output tensor.
    pub fn fp32_output(&self, name: &str) -> Result<Fp32Tensor, TritonError> {
        let (index, output) = self.output(name)?;
        if !output.datatype.is_empty() && output.datatype != "FP32" {
            return Err(TritonError::Decode {
                name: name.to_string(),
                reason: format!("expected FP32, got {}", output.datatype),
            });
        }

        let data = if let Some(raw) = self.raw_output_contents.get(index) {
            if raw.len() % 4 != 0 {
                return Err(TritonError::Decode {
                    name: name.to_string(),
                    reason: format!("raw length {} is not a multiple of 4", raw.len()),
                });
            }
            raw.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        } else {
            output
                .contents
                .as_ref()
                .map(|c| c.fp32_contents.clone())
                .unwrap_or_default()
        };

        Ok(Fp32Tensor {
            shape: output.shape.clone(),
            data,
        })
    }
}

fn serialize_bytes_tensor<T: AsRef<[u8]>>(elements: &[T]) -> Vec<u8> {
    let capacity = elements.iter().map(|e| e.as_ref().len() + 4).sum();
    let mut buf = Vec::with_capacity(capacity);
    for element in elements {
        let bytes = element.as_ref();
        buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(bytes);
    }
    buf
}

fn deserialize_bytes_tensor(name: &str, mut raw: &[u8]) -> Result<Vec<Vec<u8>>, TritonError> {
    let mut elements = Vec::new();
    while !raw.is_empty() {
        if raw.len() < 4 {
            return Err(TritonError::Decode {
                name: name.to_string(),
                reason: "truncated length prefix".to_string(),
            });
        }
        let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        raw = &raw[4..];
        if raw.len() < len {
            return Err(TritonError::Decode {
                name: name.to_string(),
                reason: format!("element of {} bytes exceeds remaining {}", len, raw.len()),
            });
        }
        elements.push(raw[..len].to_vec());
        raw = &raw[len..];
    }
    Ok(elements)
}

/// Transport used to run `ModelInfer` against a `host:port` target.
#[async_trait]
pub trait TritonTransport: Send + Sync + Debug {
    async fn model_infer(
        &self,
        target: &str,
        request: ModelInferRequest,
        timeout: Option<Duration>,
    ) -> Result<ModelInferResponse, TritonError>;
}

/// Tonic-backed transport that keeps one lazily connected channel per target.
#[derive(Debug, Default)]
pub struct GrpcTritonTransport {
    channels: DashMap<String, Channel>,
}

impl GrpcTritonTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, target: &str) -> Result<Channel, TritonError> {
        if let Some(channel) = self.channels.get(target) {
            return Ok(channel.clone());
        }

        debug!("Creating gRPC channel to Triton server at {}", target);
        let endpoint =
            Channel::from_shared(format!("http://{}", target)).map_err(|e| {
                TritonError::Connect {
                    target: target.to_string(),
                    message: e.to_string(),
                }
            })?;

        let channel = endpoint
            .http2_keep_alive_interval(Duration::from_secs(30))
            .keep_alive_timeout(Duration::from_secs(10))
            .keep_alive_while_idle(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .http2_adaptive_window(true)
            .connect_lazy();

        self.channels.insert(target.to_string(), channel.clone());
        Ok(channel)
    }
}

#[async_trait]
impl TritonTransport for GrpcTritonTransport {
    async fn model_infer(
        &self,
        target: &str,
        request: ModelInferRequest,
        timeout: Option<Duration>,
    ) -> Result<ModelInferResponse, TritonError> {
        let channel = self.channel(target)?;
        let mut grpc = Grpc::new(channel)
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);

        grpc.ready().await.map_err(|e| TritonError::Connect {
            target: target.to_string(),
            message: e.to_string(),
        })?;

        let mut request = tonic::Request::new(request);
        if let Some(timeout) = timeout {
            request.set_timeout(timeout);
        }

        let codec: ProstCodec<ModelInferRequest, ModelInferResponse> = ProstCodec::default();
        let response = grpc
            .unary(request, PathAndQuery::from_static(MODEL_INFER_PATH), codec)
            .await
            .map_err(|status| TritonError::Rpc { status })?;

        Ok(response.into_inner())
    }
}
