//! Weighted random policy driven by endpoint failure history

use rand::Rng;

use super::{get_healthy_endpoint_indices, LoadBalancingPolicy, SelectionContext};
use crate::core::EndpointStats;

/// Weighted selection policy
///
/// Draws a healthy endpoint with probability proportional to its weight,
/// which shrinks with the endpoint's lifetime failure rate down to a floor
/// of 0.1. If every weight is zero, all candidates are weighted equally.
#[derive(Debug, Default)]
pub struct WeightedRoundRobinPolicy;

impl WeightedRoundRobinPolicy {
    pub fn new() -> Self {
        Self
    }

    fn draw(weights: &[f64], rng: &mut impl Rng) -> usize {
        let total: f64 = weights.iter().sum();
        let mut point = rng.random::<f64>() * total;
        for (idx, weight) in weights.iter().enumerate() {
            if point < *weight {
                return idx;
            }
            point -= weight;
        }
        // Rounding can leave `point` just past the last bucket
        weights.iter().rposition(|w| *w > 0.0).unwrap_or(0)
    }
}

impl LoadBalancingPolicy for WeightedRoundRobinPolicy {
    fn select_endpoint(
        &self,
        candidates: &[&EndpointStats],
        ctx: &mut SelectionContext<'_>,
    ) -> Option<usize> {
        let healthy_indices = get_healthy_endpoint_indices(candidates, ctx);
        if healthy_indices.is_empty() {
            return None;
        }

        let mut weights: Vec<f64> = healthy_indices
            .iter()
            .map(|&idx| candidates[idx].weight(ctx.now))
            .collect();
        if weights.iter().sum::<f64>() == 0.0 {
            weights.iter_mut().for_each(|w| *w = 1.0);
        }

        let selected = healthy_indices[Self::draw(&weights, &mut rand::rng())];
        tracing::debug!(
            "Weighted-round-robin selected {} for {}",
            candidates[selected].endpoint(),
            ctx.model
        );

        Some(selected)
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}
