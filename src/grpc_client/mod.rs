//! gRPC clients for backend inference servers

pub mod triton;

pub use triton::{proto as triton_proto, GrpcTritonTransport, TritonError, TritonTransport};
