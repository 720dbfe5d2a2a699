//! RAII accounting for one downstream request
//!
//! Creating a guard marks the request start on the balancer. Dropping it
//! marks the end: as a success only if `succeed` was called first, and as a
//! failure on every other path (error return, panic, task cancellation or a
//! client disconnecting mid-stream). The end is recorded exactly once.

use std::sync::Arc;

use super::{LoadBalancer, ModelEndpoint};

#[derive(Debug)]
pub struct RequestGuard {
    balancer: Arc<LoadBalancer>,
    endpoint: ModelEndpoint,
    succeeded: bool,
}

impl RequestGuard {
    pub fn start(balancer: Arc<LoadBalancer>, endpoint: ModelEndpoint) -> Self {
        balancer.mark_request_start(&endpoint.host, endpoint.port, &endpoint.model);
        Self {
            balancer,
            endpoint,
            succeeded: false,
        }
    }

    pub fn endpoint(&self) -> &ModelEndpoint {
        &self.endpoint
    }

    /// Record a successful completion and release the guard.
    pub fn succeed(mut self) {
        self.succeeded = true;
    }

    /// Record a failure and release the guard.
    pub fn fail(self) {}
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.balancer.mark_request_end(
            &self.endpoint.host,
            self.endpoint.port,
            &self.endpoint.model,
            self.succeeded,
        );
    }
}
