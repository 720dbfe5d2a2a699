//! Endpoint address resolution
//!
//! A configured host is either a bare hostname (`10.0.0.5`, `triton-0`) or a
//! fully-qualified URL (`https://api.example.com`). These helpers turn a
//! host and port into the base URL an HTTP client needs, or the `host:port`
//! target a gRPC channel needs.

/// Port used when a model configuration lists no ports at all.
pub const DEFAULT_PORT: u16 = 8000;

/// Returns true if the host already carries an `http://` or `https://` scheme.
#[inline]
pub fn is_full_url(host: &str) -> bool {
    host.starts_with("http://") || host.starts_with("https://")
}

/// Build an HTTP URL for the endpoint, appending `path` when non-empty.
///
/// For full-URL hosts the port is ignored and trailing slashes are stripped
/// before the path is appended.
pub fn build_endpoint_url(host: &str, port: u16, path: &str) -> String {
    let base = if is_full_url(host) {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}:{}", host, port)
    };

    if path.is_empty() {
        base
    } else {
        format!("{}{}", base, path)
    }
}

/// Build a bare `host:port` target for a gRPC channel.
///
/// A full-URL host has its scheme removed and is used as-is, so it is
/// expected to carry its own port.
pub fn grpc_target(host: &str, port: u16) -> String {
    match host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
    {
        Some(rest) => rest.trim_end_matches('/').to_string(),
        None => format!("{}:{}", host, port),
    }
}

/// An endpoint chosen for a specific model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEndpoint {
    pub model: String,
    pub host: String,
    pub port: u16,
}

impl ModelEndpoint {
    pub fn url(&self, path: &str) -> String {
        build_endpoint_url(&self.host, self.port, path)
    }

    pub fn grpc_target(&self) -> String {
        grpc_target(&self.host, self.port)
    }
}

impl std::fmt::Display for ModelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
