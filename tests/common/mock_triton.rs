// In-process Triton transport for integration tests
#![allow(dead_code)]

use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use inference_gateway::grpc_client::{
    triton_proto::{InferOutputTensor, ModelInferRequest, ModelInferResponse},
    TritonError, TritonTransport,
};

/// Unit-length 2-D vector returned for every embeddings row.
pub const EMBEDDING_ROW: [f32; 2] = [0.6, 0.8];
pub const TRANSCRIPT: &str = "hello from triton";

#[derive(Debug, Default)]
pub struct MockTriton {
    calls: Mutex<Vec<(String, ModelInferRequest)>>,
    fail: Mutex<bool>,
}

impl MockTriton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> Vec<(String, ModelInferRequest)> {
        self.calls.lock().unwrap().clone()
    }
}

fn length_prefixed(elements: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::new();
    for element in elements {
        buf.extend_from_slice(&(element.len() as u32).to_le_bytes());
        buf.extend_from_slice(element);
    }
    buf
}

#[async_trait]
impl TritonTransport for MockTriton {
    async fn model_infer(
        &self,
        target: &str,
        request: ModelInferRequest,
        _timeout: Option<Duration>,
    ) -> Result<ModelInferResponse, TritonError> {
        self.calls
            .lock()
            .unwrap()
            .push((target.to_string(), request.clone()));

        if *self.fail.lock().unwrap() {
            return Err(TritonError::Rpc {
                status: tonic::Status::unavailable("model not ready"),
            });
        }

        let requested = request
            .outputs
            .first()
            .map(|o| o.name.clone())
            .unwrap_or_default();

        let (output, raw) = if requested == "embeddings" {
            let rows = request
                .inputs
                .first()
                .and_then(|i| i.shape.iter().product::<i64>().try_into().ok())
                .unwrap_or(1usize);
            let raw: Vec<u8> = (0..rows)
                .flat_map(|_| EMBEDDING_ROW.iter().flat_map(|v| v.to_le_bytes()))
                .collect();
            (
                InferOutputTensor {
                    name: requested,
                    datatype: "FP32".to_string(),
                    shape: vec![rows as i64, EMBEDDING_ROW.len() as i64],
                    contents: None,
                },
                raw,
            )
        } else {
            (
                InferOutputTensor {
                    name: requested,
                    datatype: "BYTES".to_string(),
                    shape: vec![1],
                    contents: None,
                },
                length_prefixed(&[TRANSCRIPT.as_bytes()]),
            )
        };

        Ok(ModelInferResponse {
            model_name: request.model_name.clone(),
            model_version: String::new(),
            id: request.id.clone(),
            outputs: vec![output],
            raw_output_contents: vec![raw],
        })
    }
}
