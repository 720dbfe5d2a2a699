pub mod app_context;
pub mod config;
pub mod core;
pub mod grpc_client;
pub mod middleware;
pub mod observability;
pub mod policies;
pub mod protocols;
pub mod routers;
pub mod server;
pub mod usage;
