//! Core abstractions for the gateway
//!
//! This module contains the endpoint selection and accounting machinery:
//! - Endpoint address helpers for HTTP and gRPC targets
//! - Per-endpoint statistics with derived health and weight
//! - The load balancer that owns the statistics table
//! - The RAII request guard wrapping every downstream call
//! - Error types

pub mod clock;
pub mod endpoint;
pub mod endpoint_stats;
pub mod error;
pub mod load_balancer;
pub mod request_guard;

pub use clock::{Clock, ManualClock, SystemClock};
pub use endpoint::{build_endpoint_url, grpc_target, is_full_url, ModelEndpoint, DEFAULT_PORT};
pub use endpoint_stats::{EndpointStats, EndpointStatsSnapshot};
pub use error::{FailureKind, GatewayError, GatewayResult};
pub use load_balancer::LoadBalancer;
pub use request_guard::RequestGuard;
