//! Random load balancing policy

use rand::Rng;

use super::{get_healthy_endpoint_indices, LoadBalancingPolicy, SelectionContext};
use crate::core::EndpointStats;

/// Random selection policy
///
/// Selects uniformly among the healthy endpoints.
#[derive(Debug, Default)]
pub struct RandomPolicy;

impl RandomPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancingPolicy for RandomPolicy {
    fn select_endpoint(
        &self,
        candidates: &[&EndpointStats],
        ctx: &mut SelectionContext<'_>,
    ) -> Option<usize> {
        let healthy_indices = get_healthy_endpoint_indices(candidates, ctx);
        if healthy_indices.is_empty() {
            return None;
        }

        let mut rng = rand::rng();
        let random_idx = rng.random_range(0..healthy_indices.len());

        Some(healthy_indices[random_idx])
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
