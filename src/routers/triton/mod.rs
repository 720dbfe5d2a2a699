//! Adapters for Triton backends over KServe v2 gRPC
//!
//! Endpoints are reached through the context's `TritonTransport`, so tests
//! can substitute an in-process transport for a live server.

pub mod audio;
pub mod embeddings;
