//! Least-connections load balancing policy

use super::{get_healthy_endpoint_indices, LoadBalancingPolicy, SelectionContext};
use crate::core::EndpointStats;

/// Least-connections selection policy
///
/// Picks the healthy endpoint with the fewest in-flight requests. The first
/// endpoint in configuration order wins ties.
#[derive(Debug, Default)]
pub struct LeastConnectionsPolicy;

impl LeastConnectionsPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancingPolicy for LeastConnectionsPolicy {
    fn select_endpoint(
        &self,
        candidates: &[&EndpointStats],
        ctx: &mut SelectionContext<'_>,
    ) -> Option<usize> {
        let healthy_indices = get_healthy_endpoint_indices(candidates, ctx);

        // min_by_key returns the first of several equal minima
        let selected = healthy_indices
            .into_iter()
            .min_by_key(|&idx| candidates[idx].active_connections)?;

        tracing::debug!(
            "Least-connections selected {} for {} ({} active)",
            candidates[selected].endpoint(),
            ctx.model,
            candidates[selected].active_connections
        );

        Some(selected)
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
